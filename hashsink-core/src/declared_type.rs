use crate::error::{SinkError, SinkResult};
use crate::hasher::{ContentHasher, JsonElementHasher, RawHasher};
use crate::naming;
use mime::Mime;

/// How the content of a declared type is identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashStrategy {
    /// Parse the top-level JSON array and hash its canonical elements.
    JsonElements,
    /// Hash the raw bytes.
    Raw,
}

/// A caller-supplied type token resolved to its MIME type and hash strategy.
#[derive(Debug, Clone)]
pub struct DeclaredType {
    token: String,
    mime: Mime,
    strategy: HashStrategy,
}

impl DeclaredType {
    pub fn resolve(token: &str) -> SinkResult<Self> {
        let token = token.trim().to_ascii_lowercase();
        if token.is_empty() {
            return Err(SinkError::invalid_argument("\"type\" is missing"));
        }

        let mime = mime_for(&token).ok_or_else(|| {
            SinkError::invalid_argument(format!("no known MIME type for \"{}\"", token))
        })?;

        let strategy = match token.as_str() {
            "json" => HashStrategy::JsonElements,
            _ => HashStrategy::Raw,
        };

        Ok(Self {
            token,
            mime,
            strategy,
        })
    }

    /// Resolves the type from the extension of an object key.
    pub fn from_key(key: &str) -> SinkResult<Self> {
        let extension = naming::key_extension(key).ok_or_else(|| {
            SinkError::invalid_argument(format!("key \"{}\" has no file extension", key))
        })?;
        Self::resolve(extension)
    }

    pub fn extension(&self) -> &str {
        &self.token
    }

    pub fn content_type(&self) -> &str {
        self.mime.as_ref()
    }

    pub fn strategy(&self) -> HashStrategy {
        self.strategy
    }

    pub fn hasher(&self) -> Box<dyn ContentHasher> {
        match self.strategy {
            HashStrategy::JsonElements => Box::new(JsonElementHasher::new()),
            HashStrategy::Raw => Box::new(RawHasher::new()),
        }
    }
}

fn mime_for(token: &str) -> Option<Mime> {
    let mime = match token {
        "json" | "map" => mime::APPLICATION_JSON,
        "js" | "mjs" => mime::APPLICATION_JAVASCRIPT_UTF_8,
        "css" => mime::TEXT_CSS_UTF_8,
        "html" | "htm" => mime::TEXT_HTML_UTF_8,
        "txt" => mime::TEXT_PLAIN_UTF_8,
        "csv" => mime::TEXT_CSV_UTF_8,
        "xml" => mime::TEXT_XML,
        "svg" => mime::IMAGE_SVG,
        "png" => mime::IMAGE_PNG,
        "jpg" | "jpeg" => mime::IMAGE_JPEG,
        "gif" => mime::IMAGE_GIF,
        "ico" => "image/x-icon".parse().ok()?,
        "woff" => mime::FONT_WOFF,
        "woff2" => mime::FONT_WOFF2,
        "pdf" => mime::APPLICATION_PDF,
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_types() {
        let json = DeclaredType::resolve("json").unwrap();
        assert_eq!(json.extension(), "json");
        assert_eq!(json.content_type(), "application/json");
        assert_eq!(json.strategy(), HashStrategy::JsonElements);

        let css = DeclaredType::resolve("css").unwrap();
        assert_eq!(css.content_type(), "text/css; charset=utf-8");
        assert_eq!(css.strategy(), HashStrategy::Raw);

        let js = DeclaredType::resolve(" JS ").unwrap();
        assert_eq!(js.extension(), "js");
        assert_eq!(js.strategy(), HashStrategy::Raw);
    }

    #[test]
    fn test_resolve_rejects_missing_and_unknown() {
        assert_eq!(
            DeclaredType::resolve("").unwrap_err(),
            SinkError::InvalidArgument("\"type\" is missing".to_string())
        );
        assert!(matches!(
            DeclaredType::resolve("fake"),
            Err(SinkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_from_key_uses_extension() {
        let declared = DeclaredType::from_key("some-path/a.json").unwrap();
        assert_eq!(declared.extension(), "json");

        assert!(matches!(
            DeclaredType::from_key("a.fake"),
            Err(SinkError::InvalidArgument(_))
        ));
        assert!(matches!(
            DeclaredType::from_key("no-extension"),
            Err(SinkError::InvalidArgument(_))
        ));
        assert!(matches!(
            DeclaredType::from_key("dir.json/file"),
            Err(SinkError::InvalidArgument(_))
        ));
    }
}
