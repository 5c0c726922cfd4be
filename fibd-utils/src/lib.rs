//
// Copyright (c) The Fibd Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod backoff;
pub mod bytes;
pub mod ibus;
pub mod ip;
pub mod mpls;
pub mod perf;
pub mod southbound;
pub mod task;

// Useful type definition(s).
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
pub type Sender<T> = tokio::sync::mpsc::Sender<T>;
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;
pub type Responder<T> = tokio::sync::oneshot::Sender<T>;
