/// Version banner advertised by the mock endpoint in its greeting.
pub const fn server_identifier() -> &'static str {
    concat!(
        "Tarantool 2.11.0 (Binary) ",
        env!("CARGO_PKG_NAME"),
        "/",
        env!("CARGO_PKG_VERSION")
    )
}
