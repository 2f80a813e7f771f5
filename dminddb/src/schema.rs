diesel::table! {
    devices (device_id) {
        device_id -> Text,
        name -> Text,
        device_type -> Text,
        status -> Text,
        last_seen -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    device_logs (id) {
        id -> Integer,
        device_id -> Text,
        data -> Text,
        ts -> Timestamp,
        created_at -> Timestamp,
    }
}

diesel::table! {
    firmware (id) {
        id -> Integer,
        version -> Text,
        file_path -> Text,
        is_active -> Bool,
        created_at -> Timestamp,
    }
}

diesel::joinable!(device_logs -> devices (device_id));

diesel::allow_tables_to_appear_in_same_query!(device_logs, devices, firmware,);
