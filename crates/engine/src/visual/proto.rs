//! Messages and client stub generated from `proto/visual.proto`
//! (package `visual.v1`).

#![allow(clippy::all, missing_docs)]

tonic::include_proto!("visual.v1");
