use thiserror::Error;

use crate::xml::XmlError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostingError {
    #[error("payload hosting not ready")]
    NotReady,

    #[error("payload hosting is not initialized")]
    NotInitialized,

    #[error("field '{path}' does not exist")]
    FieldNotFound { path: String },

    #[error("list item '{path}' does not exist")]
    ListItemNotFound { path: String },

    #[error("field definition for '{path}' does not exist")]
    FieldDefNotFound { path: String },

    #[error("list definition for '{path}' does not exist")]
    ListDefNotFound { path: String },

    #[error("the list of '{path}' is already full ({maximum} items)")]
    ListCapacity { path: String, maximum: usize },

    #[error("cannot remove list item: the list of '{path}' must contain at least {minimum} items")]
    ListMinimum { path: String, minimum: usize },

    #[error(transparent)]
    ListRange(#[from] ListRangeError),

    #[error("payload hosting does not have a model")]
    NoModel,

    #[error("'{path}' is not a list")]
    NotAList { path: String },

    #[error(transparent)]
    Xml(#[from] XmlError),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ListRangeError {
    #[error("insert position out of range ({} to {} expected)", lowest_insert(.count), .count)]
    Insert { count: usize },

    #[error("delete position out of range (cannot delete from an empty list)")]
    RemoveFromEmpty,

    #[error("delete position out of range ({} to {} expected)", lowest_remove(.count), highest_remove(.count))]
    Remove { count: usize },
}

fn lowest_insert(count: &usize) -> i64 {
    -(*count as i64) - 1
}

fn lowest_remove(count: &usize) -> i64 {
    -(*count as i64)
}

fn highest_remove(count: &usize) -> i64 {
    *count as i64 - 1
}

impl ListRangeError {
    pub fn remove(count: usize) -> Self {
        if count == 0 {
            Self::RemoveFromEmpty
        } else {
            Self::Remove { count }
        }
    }
}
