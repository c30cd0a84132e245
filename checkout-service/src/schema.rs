diesel::table! {
    carts (user_id, sku) {
        user_id -> Int8,
        sku -> Int8,
        count -> Int4,
    }
}
