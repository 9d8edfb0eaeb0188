use crate::error::{LiftError, Result};
use crate::models::{LiftDocument, LiftRanges};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use quick_xml::de::from_str;
use tokio::task;

/// Parses LIFT XML content into a `LiftDocument` using spawn_blocking.
pub async fn parse_lift(xml_content: String) -> Result<LiftDocument> {
    debug!("Starting LIFT XML parsing (using spawn_blocking)...");
    let document = task::spawn_blocking(move || parse_lift_str(&xml_content)).await??;
    debug!(
        "Parsed LIFT document with {} entries (producer: {}).",
        document.entries.len(),
        document.producer.as_deref().unwrap_or("unknown")
    );
    Ok(document)
}

/// Synchronous variant of [`parse_lift`].
pub fn parse_lift_str(xml_content: &str) -> Result<LiftDocument> {
    from_str(xml_content).map_err(LiftError::from)
}

/// Parses a stand-alone `.lift-ranges` file.
pub fn parse_lift_ranges(xml_content: &str) -> Result<LiftRanges> {
    from_str(xml_content).map_err(LiftError::from)
}

/// Parses a LIFT timestamp. Both the full UTC form and a bare date are accepted.
pub fn parse_lift_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%SZ") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(naive.and_utc());
        }
    }
    Err(LiftError::ParseError(format!("invalid LIFT date '{}'", value)))
}

/// Formats a timestamp the way LIFT writes it.
pub fn format_lift_date(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const MINIMAL_LIFT_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<lift version="0.13" producer="SIL.FLEx 8.3">
  <header>
    <ranges>
      <range id="grammatical-info">
        <range-element id="Noun" guid="a8e41fd3-e343-4c7c-aa05-01ea3dd5cfb5">
          <label><form lang="en"><text>Noun</text></form></label>
          <abbrev><form lang="en"><text>n</text></form></abbrev>
        </range-element>
      </range>
    </ranges>
    <fields>
      <field tag="Plural">
        <form lang="en"><text>Plural form</text></form>
        <form lang="qaa-x-spec"><text>Class=LexEntry; Type=MultiUnicode; WsSelector=kwsVern</text></form>
      </field>
    </fields>
  </header>
  <entry id="cat_1" guid="0ae89610-fc01-4bfd-a0d6-1125b7281dd1" dateCreated="2008-03-01T10:00:00Z" dateModified="2008-03-02T10:00:00Z">
    <lexical-unit><form lang="en"><text>cat</text></form></lexical-unit>
    <trait name="morph-type" value="stem"/>
    <sense id="cat_s1">
      <grammatical-info value="Noun"/>
      <gloss lang="en"><text>feline</text></gloss>
      <example>
        <form lang="en"><text>The cat sat.</text></form>
        <translation><form lang="fr"><text>Le chat s'assit.</text></form></translation>
      </example>
    </sense>
    <relation type="Synonym" ref="dog_2"/>
    <field type="Plural"><form lang="en"><text>cats</text></form></field>
    <trait name="do-not-publish" value="true"/>
  </entry>
  <entry id="dog_2">
    <lexical-unit><form lang="en"><text>dog</text></form></lexical-unit>
  </entry>
</lift>
"#;

    #[tokio::test]
    async fn test_parse_minimal_lift() {
        let result = parse_lift(MINIMAL_LIFT_XML.to_string()).await;
        assert!(result.is_ok(), "Parsing failed: {:?}", result.err());
        let doc = result.unwrap();
        assert_eq!(doc.producer.as_deref(), Some("SIL.FLEx 8.3"));
        assert_eq!(doc.entries.len(), 2);

        let cat = &doc.entries[0];
        assert_eq!(cat.id.as_deref(), Some("cat_1"));
        assert_eq!(
            cat.lexical_unit.as_ref().and_then(|u| u.get("en")),
            Some("cat")
        );
        // Non-adjacent <trait> elements still land in one list.
        assert_eq!(cat.traits.len(), 2);
        assert_eq!(cat.relations[0].relation_type, "Synonym");
        assert_eq!(cat.relations[0].target, "dog_2");
        assert_eq!(cat.relations[0].order, None);

        let sense = &cat.senses[0];
        assert_eq!(sense.glosses[0].text, "feline");
        assert_eq!(sense.grammatical_info.as_ref().unwrap().value, "Noun");
        assert_eq!(sense.examples[0].translations[0].forms[0].lang, "fr");

        let header = doc.header.as_ref().unwrap();
        let range = &header.ranges.as_ref().unwrap().ranges[0];
        assert_eq!(range.id, "grammatical-info");
        assert_eq!(range.elements[0].id, "Noun");
        let fields = &header.fields.as_ref().unwrap().fields;
        assert_eq!(fields[0].tag, "Plural");
        assert_eq!(fields[0].forms.len(), 2);
    }

    #[test]
    fn test_parse_ranges_file() {
        let xml = r#"<lift-ranges>
  <range id="semantic-domain-ddp4">
    <range-element id="1 Universe">
      <label><form lang="en"><text>Universe</text></form></label>
    </range-element>
    <range-element id="1.1 Sky" parent="1 Universe"/>
  </range>
</lift-ranges>"#;
        let ranges = parse_lift_ranges(xml).unwrap();
        assert_eq!(ranges.ranges[0].elements.len(), 2);
        assert_eq!(
            ranges.ranges[0].elements[1].parent.as_deref(),
            Some("1 Universe")
        );
    }

    #[test]
    fn test_parse_lift_date_formats() {
        let full = parse_lift_date("2011-06-29T16:05:17Z").unwrap();
        assert_eq!(full.year(), 2011);
        assert_eq!(full.hour(), 16);
        assert_eq!(format_lift_date(&full), "2011-06-29T16:05:17Z");

        let bare = parse_lift_date("2011-06-29").unwrap();
        assert_eq!(bare.day(), 29);
        assert_eq!(bare.hour(), 0);

        assert!(matches!(
            parse_lift_date("yesterday"),
            Err(LiftError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_invalid_xml() {
        let result = parse_lift_str("<lift><entry id=\"x\"></lift>");
        assert!(result.is_err());
    }
}
