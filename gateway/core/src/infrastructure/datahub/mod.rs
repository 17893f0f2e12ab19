// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Master-data-hub adapter: authenticated catalog and record-query client
//! plus the XML wire codec.

mod client;
mod xml;

pub use client::{ConnectionTestResult, DataHubClient, RecordQueryParams, RecordFilter, unauthorized_troubleshooting};
pub use xml::{build_record_query, parse_model, parse_model_list, parse_record_query_response, RecordSet};
