// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! XML wire codec for the master data hub.
//!
//! Requests are built element-by-element; responses are parsed from the
//! event stream using local element names only, so any namespace prefix
//! the hub chooses is handled without configuration.

use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::{Map, Value};

use crate::domain::errors::GatewayError;
use crate::domain::model::{ModelDescriptor, ModelField, ModelSource, PublicationStatus};

use super::client::RecordFilter;

/// Parsed record-query response.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct RecordSet {
    pub records: Vec<Map<String, Value>>,
    pub total_returned: usize,
    pub total_count: usize,
    pub has_more: bool,
    pub next_offset_token: String,
}

/// Build the `<RecordQueryRequest>` body.
pub fn build_record_query(
    fields: &[String],
    filters: &[RecordFilter],
    limit: u32,
    offset_token: &str,
) -> String {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let limit_text = limit.to_string();

    let mut root = BytesStart::new("RecordQueryRequest");
    root.push_attribute(("limit", limit_text.as_str()));
    root.push_attribute(("offsetToken", offset_token));
    write(&mut writer, Event::Start(root));

    write(&mut writer, Event::Start(BytesStart::new("view")));
    for field in fields {
        write_text_element(&mut writer, "fieldId", field);
    }
    write(&mut writer, Event::End(BytesEnd::new("view")));

    if !filters.is_empty() {
        let mut filter_root = BytesStart::new("filter");
        if filters.len() > 1 {
            filter_root.push_attribute(("op", "AND"));
        }
        write(&mut writer, Event::Start(filter_root));
        for filter in filters {
            write(&mut writer, Event::Start(BytesStart::new("fieldValue")));
            write_text_element(&mut writer, "fieldId", &filter.field_id);
            write_text_element(&mut writer, "operator", &filter.operator);
            write_text_element(&mut writer, "value", &filter.value);
            write(&mut writer, Event::End(BytesEnd::new("fieldValue")));
        }
        write(&mut writer, Event::End(BytesEnd::new("filter")));
    }

    write(&mut writer, Event::End(BytesEnd::new("RecordQueryRequest")));
    String::from_utf8(writer.into_inner().into_inner()).expect("writer emits utf-8")
}

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) {
    writer.write_event(event).expect("in-memory write");
}

fn write_text_element(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) {
    write(writer, Event::Start(BytesStart::new(name)));
    write(writer, Event::Text(BytesText::new(text)));
    write(writer, Event::End(BytesEnd::new(name)));
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attribute(start: &BytesStart<'_>, name: &str) -> Option<String> {
    start
        .try_get_attribute(name)
        .ok()
        .flatten()
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_error(e: impl std::fmt::Display) -> GatewayError {
    GatewayError::MdhParseError(e.to_string())
}

/// Parse a record-query response.
///
/// Detects `Record` elements by local name, lifts `recordId` into
/// `_record_id`, and copies each leaf under the `Fields` wrapper into the
/// record map keyed by its upper-cased local name. `resultCount`,
/// `totalCount`, and `offsetToken` come off the root element.
pub fn parse_record_query_response(xml: &str) -> Result<RecordSet, GatewayError> {
    let mut reader = Reader::from_str(xml);
    let mut records: Vec<Map<String, Value>> = Vec::new();
    let mut total_count: usize = 0;
    let mut offset_token = String::new();

    let mut root_seen = false;
    let mut in_record = false;
    let mut current: Map<String, Value> = Map::new();
    let mut stack: Vec<String> = Vec::new();
    let mut pending_text: Option<String> = None;

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                if !root_seen {
                    root_seen = true;
                    total_count = attribute(&e, "totalCount")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    offset_token = attribute(&e, "offsetToken").unwrap_or_default();
                } else if !in_record && name == "Record" {
                    in_record = true;
                    current = Map::new();
                    stack.clear();
                    if let Some(id) = attribute(&e, "recordId") {
                        current.insert("_record_id".into(), Value::String(id));
                    }
                } else if in_record {
                    stack.push(name);
                    pending_text = None;
                }
            }
            Event::Text(t) => {
                if in_record {
                    let text = t.unescape().map_err(parse_error)?;
                    let text = text.trim();
                    if !text.is_empty() {
                        pending_text = Some(text.to_string());
                    }
                }
            }
            Event::Empty(e) => {
                let name = local_name(e.local_name().as_ref());
                if in_record && stack.iter().any(|s| s == "Fields") {
                    current.insert(name.to_uppercase(), Value::String(String::new()));
                }
            }
            Event::End(e) => {
                let name = local_name(e.local_name().as_ref());
                if in_record {
                    if name == "Record" {
                        records.push(std::mem::take(&mut current));
                        in_record = false;
                    } else {
                        if let Some(text) = pending_text.take() {
                            if name != "Fields" && stack.iter().any(|s| s == "Fields") {
                                current.insert(name.to_uppercase(), Value::String(text));
                            }
                        }
                        stack.pop();
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_seen {
        return Err(GatewayError::MdhParseError("empty response body".into()));
    }

    let total_returned = records.len();
    let has_more = total_returned < total_count;
    Ok(RecordSet {
        records,
        total_returned,
        total_count,
        has_more,
        next_offset_token: if has_more { offset_token } else { String::new() },
    })
}

fn parse_status(raw: Option<&str>) -> PublicationStatus {
    match raw {
        Some("true") | Some("publish") => PublicationStatus::Publish,
        _ => PublicationStatus::Draft,
    }
}

/// Parse a model catalog listing: `Universe` elements with child
/// `id`/`name`/`publicationStatus`/`latestVersion` text elements.
pub fn parse_model_list(xml: &str) -> Result<Vec<ModelDescriptor>, GatewayError> {
    let mut reader = Reader::from_str(xml);
    let mut models = Vec::new();

    let mut in_model = false;
    let mut fields: Map<String, Value> = Map::new();
    let mut current_elem: Option<String> = None;

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                if name == "Universe" || name == "Model" {
                    in_model = true;
                    fields = Map::new();
                } else if in_model {
                    current_elem = Some(name);
                }
            }
            Event::Text(t) => {
                if let Some(elem) = &current_elem {
                    let text = t.unescape().map_err(parse_error)?;
                    fields.insert(elem.clone(), Value::String(text.trim().to_string()));
                }
            }
            Event::End(e) => {
                let name = local_name(e.local_name().as_ref());
                if in_model && (name == "Universe" || name == "Model") {
                    in_model = false;
                    let get = |key: &str| {
                        fields
                            .get(key)
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    };
                    if let (Some(id), Some(name)) = (get("id"), get("name")) {
                        models.push(ModelDescriptor {
                            id,
                            name,
                            publication_status: parse_status(
                                fields.get("publicationStatus").and_then(Value::as_str),
                            ),
                            latest_version: get("latestVersion"),
                            fields: Vec::new(),
                            sources: Vec::new(),
                            match_rule_count: 0,
                            record_title_fields: Vec::new(),
                        });
                    }
                } else {
                    current_elem = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(models)
}

/// Parse one detailed model: basic text elements plus attribute-carried
/// `field`, `source`, `matchRule`, and record-title `parameter` elements.
pub fn parse_model(xml: &str) -> Result<ModelDescriptor, GatewayError> {
    let mut reader = Reader::from_str(xml);

    let mut text_fields: Map<String, Value> = Map::new();
    let mut current_elem: Option<String> = None;
    let mut model_fields: Vec<ModelField> = Vec::new();
    let mut sources: Vec<ModelSource> = Vec::new();
    let mut match_rule_count = 0usize;
    let mut title_fields: Vec<String> = Vec::new();
    let mut root_seen = false;

    let mut handle_field = |e: &BytesStart<'_>| {
        let original = attribute(e, "name").unwrap_or_default();
        if original.is_empty() {
            return;
        }
        model_fields.push(ModelField::from_original(
            &original,
            &attribute(e, "type").unwrap_or_default(),
            attribute(e, "required").as_deref() == Some("true"),
            attribute(e, "repeatable").as_deref() == Some("true"),
            &attribute(e, "uniqueId").unwrap_or_default(),
        ));
    };

    loop {
        match reader.read_event().map_err(parse_error)? {
            Event::Start(e) | Event::Empty(e) => {
                let name = local_name(e.local_name().as_ref());
                if !root_seen {
                    root_seen = true;
                    continue;
                }
                match name.as_str() {
                    "field" => handle_field(&e),
                    "source" => sources.push(ModelSource {
                        id: attribute(&e, "id").unwrap_or_default(),
                        source_type: attribute(&e, "type").unwrap_or_default(),
                        allow_multiple_links: attribute(&e, "allowMultipleLinks").as_deref()
                            == Some("true"),
                        default: attribute(&e, "default").as_deref() == Some("true"),
                    }),
                    "matchRule" => match_rule_count += 1,
                    "parameter" => {
                        if let Some(unique_id) = attribute(&e, "uniqueId") {
                            title_fields.push(unique_id);
                        }
                    }
                    "fields" | "sources" | "matchRules" | "recordTitle" | "titleParameters" => {}
                    other => current_elem = Some(other.to_string()),
                }
            }
            Event::Text(t) => {
                if let Some(elem) = &current_elem {
                    let text = t.unescape().map_err(parse_error)?;
                    text_fields.insert(elem.clone(), Value::String(text.trim().to_string()));
                }
            }
            Event::End(_) => {
                current_elem = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let get = |key: &str| {
        text_fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    let id = get("id").ok_or_else(|| parse_error("model response carried no id"))?;
    let name = get("name").ok_or_else(|| parse_error("model response carried no name"))?;
    let latest_version = get("latestVersion").or_else(|| get("version"));

    Ok(ModelDescriptor {
        id,
        name,
        // Detailed responses omit publicationStatus; a versioned model is live.
        publication_status: match text_fields.get("publicationStatus").and_then(Value::as_str) {
            Some(raw) => parse_status(Some(raw)),
            None if latest_version.is_some() => PublicationStatus::Publish,
            None => PublicationStatus::Draft,
        },
        latest_version,
        fields: model_fields,
        sources,
        match_rule_count,
        record_title_fields: title_fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_with_filters() {
        let xml = build_record_query(
            &["AD_ID".into(), "ADVERTISER".into()],
            &[
                RecordFilter {
                    field_id: "ADVERTISER".into(),
                    operator: "EQUALS".into(),
                    value: "Sony".into(),
                },
                RecordFilter {
                    field_id: "PRODUCT".into(),
                    operator: "CONTAINS".into(),
                    value: "camera".into(),
                },
            ],
            5,
            "",
        );
        assert!(xml.starts_with(r#"<RecordQueryRequest limit="5" offsetToken="">"#));
        assert!(xml.contains("<view><fieldId>AD_ID</fieldId><fieldId>ADVERTISER</fieldId></view>"));
        assert!(xml.contains(r#"<filter op="AND">"#));
        assert!(xml.contains(
            "<fieldValue><fieldId>ADVERTISER</fieldId><operator>EQUALS</operator><value>Sony</value></fieldValue>"
        ));
    }

    #[test]
    fn test_build_query_single_filter_has_no_op() {
        let xml = build_record_query(
            &["AD_ID".into()],
            &[RecordFilter {
                field_id: "ADVERTISER".into(),
                operator: "EQUALS".into(),
                value: "Sony".into(),
            }],
            100,
            "tok",
        );
        assert!(xml.contains("<filter>"));
        assert!(!xml.contains("op=\"AND\""));
        assert!(xml.contains(r#"offsetToken="tok""#));
    }

    #[test]
    fn test_build_query_escapes_values() {
        let xml = build_record_query(
            &["NAME".into()],
            &[RecordFilter {
                field_id: "NAME".into(),
                operator: "EQUALS".into(),
                value: "Johnson & Johnson <Ltd>".into(),
            }],
            10,
            "",
        );
        assert!(xml.contains("Johnson &amp; Johnson &lt;Ltd&gt;"));
    }

    const NAMESPACED_RESPONSE: &str = r#"<ns2:RecordQueryResponse xmlns:ns2="http://mdm.example.com/v1" resultCount="2" totalCount="5" offsetToken="abc123">
  <ns2:Record recordId="r-001">
    <ns2:Fields>
      <ns2:advertisement>
        <ns2:AD_ID>AD-1</ns2:AD_ID>
        <ns2:ADVERTISER>Sony</ns2:ADVERTISER>
        <ns2:PRODUCT>ZV-E10 II</ns2:PRODUCT>
      </ns2:advertisement>
    </ns2:Fields>
  </ns2:Record>
  <ns2:Record recordId="r-002">
    <ns2:Fields>
      <ns2:advertisement>
        <ns2:AD_ID>AD-2</ns2:AD_ID>
        <ns2:ADVERTISER>Sony</ns2:ADVERTISER>
        <ns2:PRODUCT/>
      </ns2:advertisement>
    </ns2:Fields>
  </ns2:Record>
</ns2:RecordQueryResponse>"#;

    #[test]
    fn test_parse_namespaced_records() {
        let set = parse_record_query_response(NAMESPACED_RESPONSE).unwrap();
        assert_eq!(set.total_returned, 2);
        assert_eq!(set.total_count, 5);
        assert!(set.has_more);
        assert_eq!(set.next_offset_token, "abc123");

        assert_eq!(set.records[0]["_record_id"], "r-001");
        assert_eq!(set.records[0]["AD_ID"], "AD-1");
        assert_eq!(set.records[0]["ADVERTISER"], "Sony");
        assert_eq!(set.records[1]["PRODUCT"], "");
    }

    #[test]
    fn test_parse_unnamespaced_records() {
        let xml = r#"<RecordQueryResponse resultCount="1" totalCount="1" offsetToken="">
  <Record recordId="r-9">
    <Fields><user><firstname>Jane</firstname><lastname>Doe</lastname></user></Fields>
  </Record>
</RecordQueryResponse>"#;
        let set = parse_record_query_response(xml).unwrap();
        assert_eq!(set.total_returned, 1);
        assert!(!set.has_more);
        assert_eq!(set.next_offset_token, "");
        // Leaf names are canonicalized to upper case.
        assert_eq!(set.records[0]["FIRSTNAME"], "Jane");
        assert_eq!(set.records[0]["LASTNAME"], "Doe");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_record_query_response("this is not xml <<<").is_err());
        assert!(parse_record_query_response("").is_err());
    }

    #[test]
    fn test_parse_model_list() {
        let xml = r#"<mdm:Universes xmlns:mdm="http://mdm.example.com/mdm">
  <mdm:Universe>
    <mdm:id>02367877-e560-4d82-b640-6a9f7ab96afa</mdm:id>
    <mdm:name>Advertisements</mdm:name>
    <mdm:publicationStatus>true</mdm:publicationStatus>
    <mdm:latestVersion>12</mdm:latestVersion>
  </mdm:Universe>
  <mdm:Universe>
    <mdm:id>674108ee-4018-4e37-ae4d-c1d9e45a3a5f</mdm:id>
    <mdm:name>Users</mdm:name>
    <mdm:publicationStatus>false</mdm:publicationStatus>
  </mdm:Universe>
</mdm:Universes>"#;
        let models = parse_model_list(xml).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].name, "Advertisements");
        assert!(models[0].is_published());
        assert_eq!(models[0].latest_version.as_deref(), Some("12"));
        assert!(!models[1].is_published());
    }

    #[test]
    fn test_parse_model_detail() {
        let xml = r#"<mdm:Universe xmlns:mdm="http://mdm.example.com/mdm">
  <mdm:id>02367877-e560-4d82-b640-6a9f7ab96afa</mdm:id>
  <mdm:name>Advertisements</mdm:name>
  <mdm:version>12</mdm:version>
  <mdm:fields>
    <mdm:field name="Ad_Id" type="STRING" required="true" uniqueId="AD_ID"/>
    <mdm:field name="advertiser" type="STRING" repeatable="false" uniqueId="ADVERTISER"/>
  </mdm:fields>
  <mdm:sources>
    <mdm:source id="crm" type="CONTRIBUTE" default="true"/>
  </mdm:sources>
  <mdm:matchRules>
    <mdm:matchRule topLevelOperator="AND"/>
  </mdm:matchRules>
  <mdm:recordTitle format="{1}">
    <mdm:titleParameters>
      <mdm:parameter uniqueId="ADVERTISER"/>
    </mdm:titleParameters>
  </mdm:recordTitle>
</mdm:Universe>"#;
        let model = parse_model(xml).unwrap();
        assert_eq!(model.name, "Advertisements");
        assert_eq!(model.fields.len(), 2);
        assert_eq!(model.fields[0].name, "AD_ID");
        assert_eq!(model.fields[0].original_name, "Ad_Id");
        assert!(model.fields[0].required);
        assert_eq!(model.fields[1].name, "ADVERTISER");
        assert_eq!(model.sources.len(), 1);
        assert_eq!(model.match_rule_count, 1);
        assert_eq!(model.record_title_fields, vec!["ADVERTISER".to_string()]);
        // A versioned model without an explicit status is live.
        assert!(model.is_published());
    }
}
