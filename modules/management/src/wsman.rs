//! WS-Management SOAP envelopes and the bits of the responses we read.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

const CIMV2: &str = "http://schemas.microsoft.com/wbem/wsman/1/wmi/root/cimv2/";
const ACTION_GET: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Get";
const ANONYMOUS: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous";

pub const CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

pub fn identify_envelope() -> String {
    concat!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
        r#"xmlns:wsmid="http://schemas.dmtf.org/wbem/wsman/identity/1/wsmanidentity.xsd">"#,
        r#"<s:Header/><s:Body><wsmid:Identify/></s:Body></s:Envelope>"#
    )
    .to_string()
}

pub fn is_identify_response(body: &str) -> bool {
    body.contains("IdentifyResponse")
}

/// `Get` of a singleton class under root/cimv2.
pub fn get_envelope(endpoint: &str, class: &str, message_id: &str, op_timeout: Duration) -> String {
    format!(
        concat!(
            r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
            r#"xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
            r#"xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd">"#,
            "<s:Header>",
            "<a:To>{to}</a:To>",
            r#"<w:ResourceURI s:mustUnderstand="true">{cimv2}{class}</w:ResourceURI>"#,
            r#"<a:ReplyTo><a:Address s:mustUnderstand="true">{anon}</a:Address></a:ReplyTo>"#,
            r#"<a:Action s:mustUnderstand="true">{action}</a:Action>"#,
            r#"<w:MaxEnvelopeSize s:mustUnderstand="true">153600</w:MaxEnvelopeSize>"#,
            "<a:MessageID>uuid:{id}</a:MessageID>",
            "<w:OperationTimeout>PT{secs}S</w:OperationTimeout>",
            "</s:Header><s:Body/></s:Envelope>"
        ),
        to = endpoint,
        cimv2 = CIMV2,
        class = class,
        anon = ANONYMOUS,
        action = ACTION_GET,
        id = message_id,
        secs = op_timeout.as_secs().max(1),
    )
}

/// Opening tag of any element, its name, and the text up to the next tag.
/// A nested `cim:Datetime` wrapper is skipped.
fn element_pattern() -> &'static Regex {
    static ELEMENT: OnceLock<Regex> = OnceLock::new();
    ELEMENT.get_or_init(|| {
        Regex::new(r"(?s)<(?:\w+:)?(\w+)(?:\s[^>]*)?>\s*(?:<(?:\w+:)?Datetime>)?([^<]*)")
            .expect("element pattern is valid")
    })
}

/// Text content of the first `<prefix:name>` element, unwrapping a nested `cim:Datetime`.
pub fn element_text(body: &str, name: &str) -> Option<String> {
    let caps = element_pattern()
        .captures_iter(body)
        .find(|c| c.get(1).is_some_and(|m| m.as_str() == name))?;
    let text = caps.get(2)?.as_str().trim();
    if text.is_empty() { None } else { Some(text.to_string()) }
}

/// Parse a CIM datetime: RFC 3339 as WS-Man renders it, or raw DMTF
/// `yyyymmddHHMMSS.ffffff+UUU` (offset in minutes).
pub fn parse_cim_datetime(s: &str) -> Result<OffsetDateTime> {
    let s = s.trim();
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }
    parse_dmtf(s)
}

fn parse_dmtf(s: &str) -> Result<OffsetDateTime> {
    if s.len() != 25 || !s.is_ascii() {
        return Err(anyhow!("not a DMTF datetime: {}", s));
    }
    let num = |range: std::ops::Range<usize>| -> Result<i32> {
        s[range].parse::<i32>().map_err(|e| anyhow!("bad DMTF field in {}: {}", s, e))
    };
    let month = Month::try_from(num(4..6)? as u8)?;
    let date = Date::from_calendar_date(num(0..4)?, month, num(6..8)? as u8)?;
    let time = Time::from_hms_micro(num(8..10)? as u8, num(10..12)? as u8, num(12..14)? as u8, num(15..21)? as u32)?;
    let minutes = num(22..25)?;
    let minutes = match &s[21..22] {
        "+" => minutes,
        "-" => -minutes,
        other => return Err(anyhow!("bad DMTF offset sign: {}", other)),
    };
    let offset = UtcOffset::from_whole_seconds(minutes * 60)?;
    Ok(PrimitiveDateTime::new(date, time).assume_offset(offset))
}
