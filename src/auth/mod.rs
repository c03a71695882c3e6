//! # Authentication
//!
//! Account storage and the challenge-response material used by the login
//! handlers. Passwords never reach the server: accounts hold a salted hash
//! computed client-side, and logins prove knowledge of it against a fresh
//! random challenge.

pub mod account;
pub mod challenge;

pub use account::{validate_registration, Account, AccountStore, MemoryAccountStore, NewAccount};
pub use challenge::{generate_challenge, solution_for, verify_solution, Challenge};
