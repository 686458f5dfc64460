pub mod entities;

pub use entities::{Comment, CommentTree, Post, PostWithComments};
