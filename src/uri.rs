//! URI handling.
//!
//! RPKI objects reference each other exclusively by `rsync://` and
//! `https://` URIs. [`valid_uri`] implements the syntactic check the
//! specification calls for: the right scheme, no control characters, and
//! no path traversal -- it says nothing about reachability.

use std::fmt;

/// A validated, owned URI of a known scheme.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Uri {
    scheme: Scheme,
    value: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    Rsync,
    Https,
}

impl Scheme {
    fn prefix(self) -> &'static str {
        match self {
            Scheme::Rsync => "rsync://",
            Scheme::Https => "https://",
        }
    }
}

impl Uri {
    pub fn parse(scheme: Scheme, value: &str) -> Result<Self, UriError> {
        valid_uri(value, scheme)?;
        Ok(Uri { scheme, value: value.to_string() })
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The rsync module: scheme-stripped authority plus first path
    /// component, e.g. `rsync://host/module/...` -> `host/module`.
    pub fn module(&self) -> &str {
        let rest = &self.value[self.scheme.prefix().len()..];
        match rest.splitn(3, '/').collect::<Vec<_>>().as_slice() {
            [host, module, ..] => {
                let end = module.as_ptr() as usize + module.len()
                    - rest.as_ptr() as usize;
                &rest[..end]
            }
            _ => rest,
        }
    }

    /// The final path component, used to classify manifest entries.
    pub fn file_name(&self) -> &str {
        self.value.rsplit('/').next().unwrap_or(&self.value)
    }

    /// This URI with its scheme stripped, for rooting under a local
    /// cache directory (`rsync://host/module/a.cer` -> `host/module/a.cer`).
    pub fn cache_relpath(&self) -> std::path::PathBuf {
        match self.value.splitn(2, "://").nth(1) {
            Some(rest) => std::path::PathBuf::from(rest),
            None => std::path::PathBuf::from(&self.value),
        }
    }
}

impl From<&rpki::uri::Rsync> for Uri {
    fn from(uri: &rpki::uri::Rsync) -> Self {
        Uri::parse(Scheme::Rsync, uri.as_str())
            .expect("rpki::uri::Rsync already validates scheme and syntax")
    }
}

impl From<&rpki::uri::Https> for Uri {
    fn from(uri: &rpki::uri::Https) -> Self {
        Uri::parse(Scheme::Https, uri.as_str())
            .expect("rpki::uri::Https already validates scheme and syntax")
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Checks that `value` has the requested scheme prefix, contains no
/// control characters, and has no `..` path-traversal component.
pub fn valid_uri(value: &str, scheme: Scheme) -> Result<(), UriError> {
    if !value.starts_with(scheme.prefix()) {
        return Err(UriError::WrongScheme);
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(UriError::ControlChar);
    }
    if value.split('/').any(|segment| segment == "..") {
        return Err(UriError::PathTraversal);
    }
    if value.len() <= scheme.prefix().len() {
        return Err(UriError::Empty);
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UriError {
    WrongScheme,
    ControlChar,
    PathTraversal,
    Empty,
}

impl fmt::Display for UriError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            UriError::WrongScheme => "wrong URI scheme",
            UriError::ControlChar => "control character in URI",
            UriError::PathTraversal => "path traversal in URI",
            UriError::Empty => "empty URI",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for UriError { }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_rsync_uri() {
        assert!(valid_uri("rsync://rpki.example/repo/ca.cer", Scheme::Rsync).is_ok());
    }

    #[test]
    fn rejects_wrong_scheme() {
        assert_eq!(
            valid_uri("https://rpki.example/repo/ca.cer", Scheme::Rsync),
            Err(UriError::WrongScheme)
        );
    }

    #[test]
    fn rejects_path_traversal() {
        assert_eq!(
            valid_uri("rsync://rpki.example/../etc/passwd", Scheme::Rsync),
            Err(UriError::PathTraversal)
        );
    }

    #[test]
    fn file_name_is_final_component() {
        let uri = Uri::parse(Scheme::Rsync, "rsync://host/repo/sub/object.roa").unwrap();
        assert_eq!(uri.file_name(), "object.roa");
    }

    #[test]
    fn cache_relpath_strips_scheme() {
        let uri = Uri::parse(Scheme::Rsync, "rsync://host/module/ca.cer").unwrap();
        assert_eq!(uri.cache_relpath(), std::path::PathBuf::from("host/module/ca.cer"));
    }
}
