pub mod profile_client;

pub use profile_client::{resolve_partner, ProfileClient, ProfileLookup};
