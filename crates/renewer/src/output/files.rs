//! Output writing PEM files to a directory tree
//!
//! ```text
//! {directory}/
//! └── example.com/
//!     └── www/
//!         ├── cert.pem       # Leaf certificate
//!         ├── chain.pem      # Intermediate chain
//!         ├── fullchain.pem  # Leaf followed by the intermediates
//!         ├── privkey.pem    # Private key (0600)
//!         └── pubkey.pem     # Public key
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::info;

use super::{OutputData, OutputError, OutputResult, OutputSink};

/// Writes certificates and keys as PEM files
#[derive(Debug, Clone)]
pub struct FilesOutput {
    directory: PathBuf,
}

impl FilesOutput {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn target(&self, data: &OutputData) -> PathBuf {
        self.directory.join(&data.domain).join(&data.certificate_name)
    }
}

async fn write_file(path: PathBuf, contents: &str, private: bool) -> OutputResult<()> {
    let io_err = |source| OutputError::Io {
        path: path.clone(),
        source,
    };

    fs::write(&path, contents).await.map_err(io_err)?;

    #[cfg(unix)]
    {
        if private {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(io_err)?;
        }
    }
    #[cfg(not(unix))]
    let _ = private;

    Ok(())
}

#[async_trait]
impl OutputSink for FilesOutput {
    fn name(&self) -> &'static str {
        "files"
    }

    async fn write(&self, data: &OutputData) -> OutputResult<()> {
        let target = self.target(data);
        fs::create_dir_all(&target)
            .await
            .map_err(|source| OutputError::Io {
                path: target.clone(),
                source,
            })?;

        write_file(target.join("privkey.pem"), &data.private_key, true).await?;
        write_file(target.join("pubkey.pem"), &data.public_key, false).await?;
        write_file(target.join("cert.pem"), &data.certificate, false).await?;
        write_file(target.join("chain.pem"), data.intermediates(), false).await?;
        write_file(target.join("fullchain.pem"), &data.chain, false).await?;

        info!(
            domain = %data.domain,
            certificate = %data.certificate_name,
            path = %target.display(),
            "Wrote certificate files"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn data() -> OutputData {
        OutputData {
            domain: "example.com".into(),
            certificate_name: "www".into(),
            public_key: "PUBLIC".into(),
            private_key: "PRIVATE".into(),
            certificate: "LEAF\n".into(),
            chain: "LEAF\nCHAIN\n".into(),
        }
    }

    #[tokio::test]
    async fn test_writes_all_files() {
        let temp_dir = TempDir::new().unwrap();
        let output = FilesOutput::new(temp_dir.path());

        output.write(&data()).await.unwrap();

        let target = temp_dir.path().join("example.com/www");
        assert_eq!(std::fs::read_to_string(target.join("cert.pem")).unwrap(), "LEAF\n");
        assert_eq!(std::fs::read_to_string(target.join("chain.pem")).unwrap(), "CHAIN\n");
        assert_eq!(
            std::fs::read_to_string(target.join("fullchain.pem")).unwrap(),
            "LEAF\nCHAIN\n"
        );
        assert_eq!(std::fs::read_to_string(target.join("privkey.pem")).unwrap(), "PRIVATE");
        assert_eq!(std::fs::read_to_string(target.join("pubkey.pem")).unwrap(), "PUBLIC");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let output = FilesOutput::new(temp_dir.path());
        output.write(&data()).await.unwrap();

        let key = temp_dir.path().join("example.com/www/privkey.pem");
        let mode = std::fs::metadata(key).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_unwritable_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "not a directory").unwrap();

        let output = FilesOutput::new(&blocker);
        let err = output.write(&data()).await.unwrap_err();
        assert_eq!(err.as_label(), "output_io");
    }
}
