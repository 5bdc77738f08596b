//! Database models.

use diesel::prelude::*;

use crate::schema::push_registrations;

/// Registration record.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = push_registrations)]
pub struct RegistrationRow {
    pub owner: String,
    pub service: String,
    pub node: String,
    /// XML plist encoding of the publish options.
    pub publish_options: Option<Vec<u8>>,
    pub created_at: chrono::NaiveDateTime,
}

/// New registration for insertion.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = push_registrations)]
pub struct NewRegistration<'a> {
    pub owner: &'a str,
    pub service: &'a str,
    pub node: &'a str,
    pub publish_options: Option<&'a [u8]>,
    pub created_at: chrono::NaiveDateTime,
}
