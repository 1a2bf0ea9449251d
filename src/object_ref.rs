use std::fmt;

/// Strips a single leading separator from a key.
pub fn normalize_key(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// An object addressed by container (bucket or volume) and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    container: String,
    key: String,
}

impl ObjectRef {
    /// `key` in `container`; a leading `/` on the key is dropped.
    pub fn new(container: impl Into<String>, key: impl AsRef<str>) -> Self {
        Self {
            container: container.into(),
            key: normalize_key(key.as_ref()).to_string(),
        }
    }

    /// Bucket or volume.
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Normalized key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Same key in another container.
    pub fn in_container(&self, container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: self.key.clone(),
        }
    }

    /// `container/key`, the form S3 expects in copy-source headers.
    pub fn copy_source(&self) -> String {
        format!("{}/{}", self.container, self.key)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_one_leading_separator() {
        assert_eq!(ObjectRef::new("b", "/a/b.txt").key(), "a/b.txt");
        assert_eq!(ObjectRef::new("b", "//a").key(), "/a");
        assert_eq!(ObjectRef::new("b", "a").key(), "a");
    }

    #[test]
    fn test_copy_source_and_container_swap() {
        let src = ObjectRef::new("src-bucket", "dir/file.bin");
        assert_eq!(src.copy_source(), "src-bucket/dir/file.bin");
        let dst = src.in_container("dst-bucket");
        assert_eq!(dst.to_string(), "dst-bucket/dir/file.bin");
        assert_eq!(src.key(), dst.key());
    }
}
