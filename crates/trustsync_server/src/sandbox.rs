//! Confinement of client paths to the served directory.

use crate::error::{ServerError, ServerResult};
use std::path::{Component, Path, PathBuf};

/// Resolves client-supplied path segments inside one base directory.
///
/// Resolution is lexical first: `.` is dropped, `..` pops one level and is
/// rejected if it would climb above the base, absolute segments are
/// rejected. The deepest existing ancestor of the result is then
/// canonicalized, so a symlink inside the tree cannot point the path
/// outside it.
#[derive(Debug, Clone)]
pub struct Sandbox {
    base: PathBuf,
}

impl Sandbox {
    /// Creates a sandbox rooted at the canonical form of `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` does not exist or is not a directory.
    pub fn new(base: &Path) -> ServerResult<Self> {
        let base = base.canonicalize()?;
        if !base.is_dir() {
            return Err(ServerError::Config(format!(
                "{} is not a directory",
                base.display()
            )));
        }
        Ok(Self { base })
    }

    /// The canonical base directory.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Returns true if `path` is the base directory itself.
    pub fn is_base(&self, path: &Path) -> bool {
        path == self.base
    }

    /// Joins `segments` onto the base.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPath` if the result would leave the base.
    pub fn resolve<S: AsRef<str>>(&self, segments: &[S]) -> ServerResult<PathBuf> {
        let mut resolved = self.base.clone();
        let mut depth = 0usize;

        for segment in segments {
            let segment = segment.as_ref();
            for component in Path::new(segment).components() {
                match component {
                    Component::Normal(name) => {
                        resolved.push(name);
                        depth += 1;
                    }
                    Component::CurDir => {}
                    Component::ParentDir => {
                        if depth == 0 {
                            return Err(escape(segments));
                        }
                        resolved.pop();
                        depth -= 1;
                    }
                    Component::RootDir | Component::Prefix(_) => {
                        return Err(escape(segments));
                    }
                }
            }
        }

        let mut probe = resolved.as_path();
        loop {
            match probe.canonicalize() {
                Ok(real) => {
                    if !real.starts_with(&self.base) {
                        return Err(escape(segments));
                    }
                    break;
                }
                Err(_) => match probe.parent() {
                    Some(parent) => probe = parent,
                    None => break,
                },
            }
        }

        Ok(resolved)
    }
}

fn escape<S: AsRef<str>>(segments: &[S]) -> ServerError {
    let joined: Vec<&str> = segments.iter().map(AsRef::as_ref).collect();
    ServerError::InvalidPath(joined.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs/inner")).unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn resolves_inside_base() {
        let (_dir, sandbox) = sandbox();
        let path = sandbox.resolve(&["docs", "inner", "a.txt"]).unwrap();
        assert_eq!(path, sandbox.base().join("docs/inner/a.txt"));

        let path = sandbox.resolve(&["docs/./inner/../x.bin"]).unwrap();
        assert_eq!(path, sandbox.base().join("docs/x.bin"));
    }

    #[test]
    fn empty_segments_resolve_to_base() {
        let (_dir, sandbox) = sandbox();
        let empty: [&str; 0] = [];
        let path = sandbox.resolve(&empty).unwrap();
        assert!(sandbox.is_base(&path));
        assert!(sandbox.is_base(&sandbox.resolve(&["docs", ".."]).unwrap()));
    }

    #[test]
    fn rejects_escapes() {
        let (_dir, sandbox) = sandbox();
        for segments in [
            vec![".."],
            vec!["..", "etc", "passwd"],
            vec!["docs", "..", ".."],
            vec!["docs/../../x"],
            vec!["/etc/passwd"],
        ] {
            assert!(
                matches!(sandbox.resolve(&segments), Err(ServerError::InvalidPath(_))),
                "{segments:?} escaped"
            );
        }
    }

    #[test]
    fn missing_base_is_rejected() {
        let dir = tempdir().unwrap();
        assert!(Sandbox::new(&dir.path().join("nope")).is_err());
        let file = dir.path().join("file");
        std::fs::write(&file, b"x").unwrap();
        assert!(Sandbox::new(&file).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_out_of_base() {
        let outside = tempdir().unwrap();
        let (dir, sandbox) = sandbox();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        assert!(sandbox.resolve(&["link"]).is_err());
        assert!(sandbox.resolve(&["link", "new.txt"]).is_err());
    }

    proptest! {
        #[test]
        fn resolved_paths_stay_in_base(
            segments in prop::collection::vec(
                prop_oneof![
                    Just("..".to_string()),
                    Just(".".to_string()),
                    Just("docs".to_string()),
                    Just("/".to_string()),
                    Just("docs/../..".to_string()),
                    "[a-z]{1,6}",
                ],
                0..8,
            )
        ) {
            let (_dir, sandbox) = sandbox();
            if let Ok(path) = sandbox.resolve(&segments) {
                prop_assert!(path.starts_with(sandbox.base()));
            }
        }
    }
}
