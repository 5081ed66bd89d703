//! Injection point for the real proof-of-work verifier. `ferrochain-chain`
//! only depends on the `PowVerifier` trait, treating it as an external
//! collaborator; this binary is where a production build would wire in the
//! real RandomX verifier instead of the permissive stand-in.

use std::sync::Arc;

use ferrochain_chain::pow::{PowVerifier, TargetOnlyVerifier};

/// Builds the verifier the coordinator runs with. There is no RandomX
/// implementation in this workspace, so this returns the same
/// `TargetOnlyVerifier` the chain crate uses in its own tests; swapping in
/// a real verifier only requires changing this function.
pub fn build_verifier() -> Arc<dyn PowVerifier> {
    Arc::new(TargetOnlyVerifier)
}
