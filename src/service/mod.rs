pub mod common;
pub mod conversion;
pub mod feed;
pub mod rates;
pub mod reference;
pub mod refresher;
pub mod reporting;
pub mod scheduler;
pub mod storage;
pub mod users;
pub mod values;
