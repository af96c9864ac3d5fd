// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

pub mod attestation;
pub mod publisher;
pub mod scheduler;

pub use attestation::{
    AttestationClient, AttestationMessage, HttpAttestationClient, ATTESTATION_STATUS_COMPLETE,
};
pub use publisher::{FinalizationNote, FinalizationPublisher, HttpFinalizationPublisher};
pub use scheduler::{AttestationFinalizer, FAST_FINALITY_THRESHOLD};
