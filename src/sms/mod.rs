//! SMS status codec

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode, encode, is_recognized};
pub use error::{SmsError, SmsResult};
pub use types::{SmsPayload, StatusCode, MAX_SMS_LEN, SMS_PREFIX, STUDENT_ID_LEN};
