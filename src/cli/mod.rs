pub mod forward;
pub mod generate_key;
pub mod helpers;
pub mod listen;
pub mod revoke_key;
