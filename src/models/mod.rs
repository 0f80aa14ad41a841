pub mod class;
pub mod todo;
pub mod user;

pub use class::{ClassRecord, ClassRow, JoinClassRequest, NewClassRequest, RenameClassRequest};
pub use todo::{CompletionMarker, NewTodoRequest, TodoEntry, UpdateTodoRequest, parse_deadline};
pub use user::{AccountType, FcmTokenRequest, UpdateProfileRequest, UserRecord};
