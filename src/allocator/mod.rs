//! Cluster-wide address allocation through host routes.
//!
//! An address is claimed by inserting a /32 (or /128) route for it into the
//! local routing table and letting the cluster's routing protocol carry that
//! route to every other host. There is no lock and no ledger: a claim is
//! checked optimistically (read, insert, wait, re-read) and two hosts that
//! pick the same address in the same window both back off and try again.
//!
//! - `attempt`: one claim of one candidate, with rollback
//! - `session`: the retry loop over candidates
//! - `record`: the claimed address and its release
//! - `error`: the error taxonomy shared by all of the above

pub mod attempt;
pub mod error;
pub mod record;
pub mod session;

pub use attempt::{attempt, Candidate};
pub use error::{AllocationError, ReleaseError, ReservedAddress};
pub use record::AddressRecord;
pub use session::{AllocationRequest, AllocationSession};
