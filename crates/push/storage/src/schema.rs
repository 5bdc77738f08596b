//! Diesel schema definitions.

diesel::table! {
    push_registrations (owner, service, node) {
        owner -> Text,
        service -> Text,
        node -> Text,
        publish_options -> Nullable<Binary>,
        created_at -> Timestamp,
    }
}
