diesel::table! {
    contacts (id) {
        id -> Uuid,
        external_contact_id -> Nullable<Varchar>,
        email -> Nullable<Varchar>,
        first_name -> Varchar,
        last_name -> Nullable<Varchar>,
        phone -> Nullable<Varchar>,
        address_line -> Nullable<Varchar>,
        city -> Nullable<Varchar>,
        state -> Nullable<Varchar>,
        postal_code -> Nullable<Varchar>,
        country -> Nullable<Varchar>,
        sync_status -> Varchar,
        last_synced_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    services (id) {
        id -> Uuid,
        external_service_id -> Varchar,
        name -> Varchar,
        duration_minutes -> Nullable<Int4>,
        price -> Nullable<Numeric>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    staff_members (id) {
        id -> Uuid,
        name -> Varchar,
        email -> Nullable<Varchar>,
        is_active -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    bookings (id) {
        id -> Uuid,
        external_booking_id -> Nullable<Varchar>,
        customer_id -> Nullable<Uuid>,
        customer_email -> Nullable<Varchar>,
        customer_name -> Varchar,
        customer_phone -> Nullable<Varchar>,
        service_id -> Nullable<Uuid>,
        service_name -> Varchar,
        service_duration -> Int4,
        appointment_date -> Nullable<Timestamptz>,
        end_time -> Nullable<Timestamptz>,
        staff_member -> Nullable<Varchar>,
        staff_id -> Nullable<Uuid>,
        status -> Varchar,
        payment_status -> Varchar,
        total_price -> Nullable<Numeric>,
        revision -> Nullable<Int8>,
        raw_payload -> Jsonb,
        sync_status -> Varchar,
        last_synced_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        external_order_id -> Varchar,
        order_number -> Nullable<Varchar>,
        customer_id -> Nullable<Uuid>,
        booking_id -> Nullable<Uuid>,
        customer_email -> Nullable<Varchar>,
        total_amount -> Numeric,
        currency -> Varchar,
        payment_status -> Varchar,
        fulfillment_status -> Varchar,
        raw_payload -> Jsonb,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        external_product_id -> Nullable<Varchar>,
        product_name -> Varchar,
        current_stock -> Int4,
        min_threshold -> Int4,
        cost_per_unit -> Nullable<Numeric>,
        is_active -> Bool,
        sync_status -> Varchar,
        last_synced_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    sync_operations (id) {
        id -> Uuid,
        entity_type -> Varchar,
        entity_id -> Uuid,
        operation_type -> Varchar,
        status -> Varchar,
        retry_count -> Int4,
        error -> Nullable<Text>,
        claimed_by -> Nullable<Varchar>,
        lease_expires_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    webhook_logs (id) {
        id -> Uuid,
        event_type -> Varchar,
        entity_id -> Nullable<Varchar>,
        status -> Varchar,
        payload -> Jsonb,
        error -> Nullable<Text>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    sync_logs (id) {
        id -> Uuid,
        sync_type -> Varchar,
        status -> Varchar,
        user_id -> Nullable<Varchar>,
        details -> Jsonb,
        error -> Nullable<Text>,
        started_at -> Timestamptz,
        completed_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(bookings -> contacts (customer_id));
diesel::joinable!(bookings -> services (service_id));
diesel::joinable!(bookings -> staff_members (staff_id));
diesel::joinable!(orders -> contacts (customer_id));
diesel::joinable!(orders -> bookings (booking_id));

diesel::allow_tables_to_appear_in_same_query!(
    bookings,
    contacts,
    orders,
    products,
    services,
    staff_members,
    sync_logs,
    sync_operations,
    webhook_logs,
);
