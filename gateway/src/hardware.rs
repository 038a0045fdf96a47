// Copyright (c) 2025 by Proof-of-Cloud.
// Licensed under the Apache License, Version 2.0, see LICENSE for details.
// SPDX-License-Identifier: Apache-2.0

use std::{collections::HashSet, sync::Arc};

/// Read-only set of hardware ids known to be verified.
#[derive(Clone, Debug, Default)]
pub struct HardwareRegistry {
    verified: Arc<HashSet<String>>,
}

impl HardwareRegistry {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verified: Arc::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn is_verified(&self, id: &str) -> bool {
        self.verified.contains(id)
    }
}
