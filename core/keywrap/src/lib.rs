//! Platform key-wrap bridge for SealVault.
//!
//! Lets a biometric or device credential unlock a vault by wrapping the
//! vault key with a secure-element-backed platform key:
//! - [`PlatformKeyStore`]: the capability each platform adapter implements
//! - [`KeyWrapBridge`]: versioned aliasing, rotation, revocation and
//!   orphan self-healing on top of any adapter
//! - [`SoftwareKeyStore`]: in-process adapter used for tests and platforms
//!   without secure hardware

pub mod bridge;
pub mod metadata;
pub mod platform;
pub mod software;

pub use bridge::{BridgeConfig, KeyWrapBridge};
pub use metadata::{PlatformKeyMetadata, WrappedKeyRecord};
pub use platform::{KeyPolicy, PlatformKeyStore};
pub use software::{PromptOutcome, SoftwareKeyStore};
