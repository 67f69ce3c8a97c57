pub mod assignment;
pub mod config;
pub mod error;
pub mod generator;
pub mod history;
pub mod participant;
pub mod service;
pub mod store;
pub mod utils;
pub mod validator;

pub use assignment::Assignment;
pub use config::DrawPolicy;
pub use error::{DataIntegrityError, GenerationError, StoreError};
pub use generator::{Strategy, generate};
pub use history::{History, HistoryProvider};
pub use participant::{ParticipantId, Year};
pub use validator::{Lookback, is_valid};
