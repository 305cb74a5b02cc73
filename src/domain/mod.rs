mod background;
mod codec;
mod profile_name;
mod reconcile;
mod types;

pub use background::*;
pub use codec::*;
pub use profile_name::*;
pub use reconcile::*;
pub use types::*;
