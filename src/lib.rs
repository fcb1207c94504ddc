//! File ownership ledger for game mod deployment.
//!
//! Each game file a mod overrides gets a [`lineage::FileLineage`]: the stack of
//! mods that ship that file, ordered by load order, whose top entry is the
//! content currently on disk. [`deploy::DeploymentCoordinator`] applies and
//! removes mods against those stacks under a per-game lock, backing up original
//! game files before their first override and restoring them once the last
//! owner is gone.

pub mod backup;
pub mod cli;
pub mod config;
pub mod content;
pub mod context;
pub mod deploy;
pub mod error;
pub mod layout;
pub mod lineage;
pub mod lock;
pub mod manifest;
pub mod state;
pub mod store;

pub use context::{ManagerContext, ManagerSettings};
pub use deploy::{DeployReport, DeploymentCoordinator, ModState, RemoveReport, SkippedFile};
pub use error::{ManagerError, Result};
pub use lineage::{FileLineage, FileVersion};
pub use manifest::{CompileMetadata, ModFile, ModManifest};
pub use state::GameState;
