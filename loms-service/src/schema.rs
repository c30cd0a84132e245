diesel::table! {
    orders (order_id) {
        order_id -> Int8,
        user_id -> Int8,
        status -> Int2,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (order_id, position) {
        order_id -> Int8,
        position -> Int4,
        sku -> Int8,
        count -> Int4,
    }
}

diesel::table! {
    stocks (sku, warehouse_id) {
        sku -> Int8,
        warehouse_id -> Int8,
        count -> Int8,
    }
}

diesel::table! {
    reservations (order_id, sku, warehouse_id) {
        order_id -> Int8,
        sku -> Int8,
        warehouse_id -> Int8,
        count -> Int8,
        active_until -> Timestamptz,
    }
}

diesel::table! {
    outbox (msg_id) {
        msg_id -> Int8,
        key -> Text,
        message -> Text,
    }
}

diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(reservations -> orders (order_id));

diesel::allow_tables_to_appear_in_same_query!(
    orders,
    order_items,
    stocks,
    reservations,
    outbox,
);
