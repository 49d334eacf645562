//! End-to-end checks that run the server against a mock mail gateway.
//! Everything lives under `tests/`.
