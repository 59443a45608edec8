pub mod body;
pub mod constraint;
pub mod contact;
pub mod continuous;
pub mod dirty;
pub mod island;
pub mod marker;
pub mod presentation;
pub mod registry;
pub mod shape;
pub mod tree_view;
