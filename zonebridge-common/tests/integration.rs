//! Integration tests for zonebridge-common library.

use zonebridge_common::{
    LogFormat, MqttConfig, Topics, is_wildcard, topic_matches, unique_id_from_topic,
};

#[test]
fn test_command_topic_round_trip() {
    let topics = Topics::new("adtcs");

    // A concrete command topic is matched by the wildcard subscription
    let wildcard = topics.entity_command_wildcard();
    let command = topics.entity_command("FrontDoor");
    assert!(is_wildcard(&wildcard));
    assert!(topic_matches(&wildcard, &command));

    // and the unique id can be recovered from it
    assert_eq!(unique_id_from_topic(&command), "FrontDoor");
}

#[test]
fn test_state_topics_not_matched_by_command_wildcard() {
    let topics = Topics::new("adtcs");

    assert!(!topic_matches(
        &topics.entity_command_wildcard(),
        &topics.entity_state("FrontDoor")
    ));
    assert!(!topic_matches(
        &topics.entity_command_wildcard(),
        &topics.system_command()
    ));
}

#[test]
fn test_all_bridge_topics_share_the_name_root() {
    let topics = Topics::new("garage");

    for topic in [
        topics.version(),
        topics.system_status(),
        topics.system_command(),
        topics.entity_state("x"),
        topics.entity_command("x"),
    ] {
        assert!(topic.starts_with("garage/"), "{topic} not rooted at bridge name");
    }

    assert!(topics.device_discovery().contains("/garage/"));
}

#[test]
fn test_parse_shared_sections() {
    #[derive(serde::Deserialize)]
    struct Sections {
        mqtt: MqttConfig,
        logging: zonebridge_common::LoggingConfig,
    }

    let sections: Sections = json5::from_str(
        r#"{
            mqtt: { host: "10.0.0.2", client_id: "panel" },
            logging: { level: "warn", format: "json" },
        }"#,
    )
    .expect("parse failed");

    assert_eq!(sections.mqtt.host, "10.0.0.2");
    assert_eq!(sections.mqtt.client_id.as_deref(), Some("panel"));
    assert_eq!(sections.logging.format, LogFormat::Json);
}
