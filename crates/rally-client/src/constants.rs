//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Storage key holding the last successfully used provider discriminator.
pub const AUTH_PROVIDER_KEY: &str = "rally.auth_provider";

/// Default backend gateway for local development.
pub const DEFAULT_BACKEND_HOST: &str = "http://127.0.0.1:4943";

/// Default canister ids of the three backend services (local replica).
pub const DEFAULT_MAIN_CANISTER: &str = "bkyz2-fmaaa-aaaaa-qaaaq-cai";
pub const DEFAULT_LEDGER_CANISTER: &str = "ryjl3-tyaaa-aaaaa-aaaba-cai";
pub const DEFAULT_STORAGE_CANISTER: &str = "be2us-64aaa-aaaaa-qaabq-cai";

/// Header carrying the caller principal on backend calls.
pub const CALLER_HEADER: &str = "x-rally-caller";

/// Directory name under the platform config/data dirs.
pub const APP_DIR: &str = "rally";

/// Config file name inside the config dir.
pub const CONFIG_FILE: &str = "session.ron";

/// Storage file name inside the data dir.
pub const STORAGE_FILE: &str = "storage.json";

/// Ed25519 seed file name inside the data dir.
pub const KEY_FILE: &str = "identity.key";

/// Delegation document file name inside the data dir.
pub const DELEGATION_FILE: &str = "delegation.json";
