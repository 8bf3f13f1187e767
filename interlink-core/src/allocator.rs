//! Port and working-directory allocation shared by every node created in one run.
//!
//! One [`ResourceAllocator`] is built at startup and handed by `&mut` to every
//! node factory. Uniqueness only holds across nodes that were created through
//! the same instance.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

/// Issues ports and working directories; one instance per run.
#[derive(Debug)]
pub struct ResourceAllocator {
    next_port: u16,
    tmp_root: PathBuf,
    next_sequence: u32,
    config_template: String,
    genesis_accounts: PathBuf,
}

impl ResourceAllocator {
    /// Builds the allocator from the harness configuration, loading the
    /// node configuration template and checking the genesis resource.
    pub fn new(config: &HarnessConfig) -> Result<Self> {
        let config_template = fs::read_to_string(&config.template_path).map_err(|e| {
            HarnessError::allocation(format!(
                "cannot load config template {}: {e}",
                config.template_path.display()
            ))
        })?;
        if !config.genesis_accounts_path.is_file() {
            return Err(HarnessError::allocation(format!(
                "genesis accounts file {} is missing",
                config.genesis_accounts_path.display()
            )));
        }
        info!(
            base_port = config.base_port,
            tmp_root = %config.tmp_root.display(),
            "resource allocator ready"
        );
        Ok(Self::with_template(
            config.base_port,
            config.tmp_root.clone(),
            config_template,
            config.genesis_accounts_path.clone(),
        ))
    }

    /// Builds an allocator from an already loaded template.
    pub fn with_template(
        base_port: u16,
        tmp_root: impl Into<PathBuf>,
        config_template: impl Into<String>,
        genesis_accounts: impl Into<PathBuf>,
    ) -> Self {
        Self {
            next_port: base_port,
            tmp_root: tmp_root.into(),
            next_sequence: 1,
            config_template: config_template.into(),
            genesis_accounts: genesis_accounts.into(),
        }
    }

    /// Hands out the next port. Ports are never reused within a run; the OS
    /// port table is not consulted.
    pub fn allocate_port(&mut self) -> Result<u16> {
        let port = self.next_port;
        self.next_port = port
            .checked_add(1)
            .ok_or_else(|| HarnessError::allocation("port range exhausted"))?;
        debug!(port, "allocated port");
        Ok(port)
    }

    /// Creates and returns a fresh `<kind>-node-NNNNN` directory under the
    /// tmp root. Candidates that already exist are skipped, and the sequence
    /// advances on every attempt. The returned path is absolute, since node
    /// processes run with a different working directory.
    pub fn allocate_directory(&mut self, kind: &str) -> Result<PathBuf> {
        loop {
            let candidate = self
                .tmp_root
                .join(format!("{kind}-node-{:05}", self.next_sequence));
            self.next_sequence = self
                .next_sequence
                .checked_add(1)
                .ok_or_else(|| HarnessError::allocation("directory sequence exhausted"))?;

            match fs::create_dir(&candidate) {
                Ok(()) => {
                    let path = if candidate.is_absolute() {
                        candidate
                    } else {
                        std::env::current_dir()?.join(candidate)
                    };
                    debug!(path = %path.display(), "allocated working directory");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(path = %candidate.display(), "candidate exists, skipping");
                }
                Err(e) => {
                    return Err(HarnessError::allocation(format!(
                        "cannot create {}: {e}",
                        candidate.display()
                    )));
                }
            }
        }
    }

    /// The Epoch configuration template text.
    pub fn get_config_template(&self) -> &str {
        &self.config_template
    }

    /// Path of the genesis accounts file.
    pub fn genesis_accounts(&self) -> &Path {
        &self.genesis_accounts
    }

    /// Parent of every allocated working directory.
    pub fn tmp_root(&self) -> &Path {
        &self.tmp_root
    }
}
