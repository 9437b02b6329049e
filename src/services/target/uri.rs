//! Public URI templating.

/// Default pattern when storage and target are different locations.
pub const DEFAULT_PATTERN: &str = "{baseUri}{keyPrefix}{sha1}/{filename}";
/// Default pattern when the storage object itself is the published object.
pub const ONE_BUCKET_PATTERN: &str = "{baseUri}{keyPrefix}{sha1}";

/// Values substituted into a pattern.
#[derive(Debug, Clone)]
pub struct UriVariables<'a> {
    pub base_uri: &'a str,
    pub bucket_name: &'a str,
    pub key_prefix: &'a str,
    pub sha1: &'a str,
    pub md5: &'a str,
    pub filename: &'a str,
    pub file_extension: &'a str,
}

impl UriVariables<'_> {
    fn lookup(&self, name: &str) -> Option<String> {
        Some(match name {
            "baseUri" => self.base_uri.to_string(),
            "bucketName" => self.bucket_name.to_string(),
            "keyPrefix" => encode_path(self.key_prefix),
            "sha1" => self.sha1.to_string(),
            "md5" => self.md5.to_string(),
            "filename" => encode_path(self.filename),
            "fileExtension" => encode_path(self.file_extension),
            _ => return None,
        })
    }
}

/// Percent-encode each segment, keeping `/` as separator.
pub fn encode_path(value: &str) -> String {
    value
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Substitute `{name}` placeholders in one pass. Unknown placeholders stay
/// as written.
pub fn render(pattern: &str, vars: &UriVariables<'_>) -> String {
    let mut out = String::with_capacity(pattern.len() + 64);
    let mut rest = pattern;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match vars.lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Append the query string of `signed_url` to `uri`.
pub fn append_signature(uri: String, signed_url: &str) -> String {
    match signed_url.split_once('?') {
        Some((_, query)) if !query.is_empty() => {
            let separator = if uri.contains('?') { '&' } else { '?' };
            format!("{}{}{}", uri, separator, query)
        }
        _ => uri,
    }
}

/// Make sure a base URI ends with exactly one `/`.
pub fn with_trailing_slash(base_uri: &str) -> String {
    format!("{}/", base_uri.trim_end_matches('/'))
}
