//! Database model for the key-value table.

use diesel::prelude::*;

#[derive(Queryable, Insertable, Selectable, Debug, Clone)]
#[diesel(table_name = crate::schema::app_storage)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AppStorageEntryDB {
    pub namespace: String,
    pub key: String,
    pub value: String,
    pub updated_at: String,
}
