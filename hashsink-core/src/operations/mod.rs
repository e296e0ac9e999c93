pub mod get_object;
pub mod has_object;
pub mod list_directory;
pub mod read_object;
pub mod set_object;
pub mod write_object;

pub use get_object::{GetObjectOperation, GetObjectOperationRequest};
pub use has_object::{HasObjectOperation, HasObjectOperationRequest};
pub use list_directory::{DirectoryEntry, ListDirectoryOperation, ListDirectoryOperationRequest};
pub use read_object::{ReadObjectOperation, ReadObjectOperationRequest, ReadStatus, SinkReader};
pub use set_object::{SetObjectOperation, SetObjectOperationRequest};
pub use write_object::{
    SinkWriter, WriteObjectOperation, WriteObjectOperationRequest, WriteOutcome, WriteState,
};
