//! End-to-end scenarios E1-E6 against an in-process Gateway and a fake
//! Receiver, run without any spawned OS process or network namespace.

mod infra;

mod e1_echo_get;
mod e2_large_post;
mod e3_no_route;
mod e4_timeout;
mod e5_disconnect;
mod e6_auth_reject;
