// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;

use crate::property::Properties;
use crate::qos::QoS;

/// The Will Message a `CONNECT` packet may carry, published by the server
/// when the session ends abnormally. MQTT 3.1.1 connections
/// always construct one with an empty `properties` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Will {
    pub qos: QoS,
    pub retain: bool,
    pub topic: String,
    pub payload: Bytes,
    pub properties: Properties,
}

impl Will {
    #[must_use]
    pub fn new(topic: String, payload: Bytes, qos: QoS, retain: bool) -> Self {
        Self {
            qos,
            retain,
            topic,
            payload,
            properties: Properties::new(),
        }
    }
}
