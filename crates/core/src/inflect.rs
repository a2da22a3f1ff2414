//! Name inflection helpers
//!
//! Derives type names, collection names, and foreign keys from association
//! names. An association named `lists` targets the `List` document type and
//! a `User` owner links through a `user_id` key unless the declaration says
//! otherwise.

use heck::{ToSnakeCase, ToUpperCamelCase};

/// Singular form of a word: "lists" becomes "list", "people" becomes "person".
pub fn singularize(word: &str) -> String {
    pluralizer::pluralize(word, 1, false)
}

/// Plural form of a word: "list" becomes "lists", "person" becomes "people".
pub fn pluralize(word: &str) -> String {
    pluralizer::pluralize(word, 2, false)
}

/// UpperCamelCase form: "chat_room" becomes "ChatRoom".
pub fn camelize(word: &str) -> String {
    word.to_upper_camel_case()
}

/// snake_case form: "ChatRoom" becomes "chat_room".
pub fn underscore(word: &str) -> String {
    word.to_snake_case()
}

/// Default document type name for an association name.
///
/// "lists" resolves to "List"; a `class_name` option on the declaration
/// overrides this.
pub fn target_type_for(association_name: &str) -> String {
    camelize(&singularize(association_name))
}

/// Default collection name for a document type name: "List" maps to "lists".
pub fn collection_for(type_name: &str) -> String {
    pluralize(&underscore(type_name))
}

/// Default foreign key for a document type name: "User" links through
/// "user_id".
pub fn foreign_key_for(type_name: &str) -> String {
    format!("{}_id", underscore(type_name))
}
