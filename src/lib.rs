//! Workspace tooling package. It exists so `rusty-hook` can install the
//! pre-commit hook; the service lives under `crates/`.
