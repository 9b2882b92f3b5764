pub mod errors;
pub mod market;
pub mod position;
pub mod settings;
pub mod suggestion;

pub use errors::*;
pub use market::*;
pub use position::*;
pub use settings::*;
pub use suggestion::*;
