use deck_protocol::{CommandKind, DeviceCommand, PresenceStatus, ServerMessage};
use serde_json::json;

#[test]
fn queue_update_decodes_with_optional_track_fields_missing() {
    let raw = r#"{"type":"queueUpdate","tracks":[
        {"id":"a","title":"Aerials","artist":"SOAD"},
        {"id":"b","title":"Byob","artist":"SOAD","album":"Mezmerize","artworkRef":"art/b"}
    ]}"#;
    let msg: ServerMessage = serde_json::from_str(raw).expect("valid queue update");
    match msg {
        ServerMessage::QueueUpdate { tracks } => {
            assert_eq!(tracks.len(), 2);
            assert_eq!(tracks[0].album, "");
            assert_eq!(tracks[0].artwork_ref, None);
            assert_eq!(tracks[1].artwork_ref.as_deref(), Some("art/b"));
        }
        other => panic!("expected queue update, got: {other:?}"),
    }
}

#[test]
fn presence_update_decodes_status_and_defaults() {
    let raw = json!({
        "type": "presenceUpdate",
        "inCall": true,
        "channelName": "General",
        "participants": [
            {"userId": "u1", "displayName": "kit", "status": "dnd", "speaking": true}
        ]
    });
    let msg: ServerMessage = serde_json::from_value(raw).expect("valid presence update");
    let ServerMessage::PresenceUpdate {
        in_call,
        self_muted,
        participants,
        ..
    } = msg
    else {
        panic!("expected presence update");
    };
    assert!(in_call);
    assert!(!self_muted);
    assert_eq!(participants[0].status, PresenceStatus::Dnd);
    assert!(participants[0].speaking);
    assert!(!participants[0].muted);
}

#[test]
fn command_ack_reason_is_optional() {
    let msg: ServerMessage =
        serde_json::from_str(r#"{"type":"commandAck","commandId":"c-1","success":true}"#)
            .expect("valid ack");
    assert_eq!(
        msg,
        ServerMessage::CommandAck {
            command_id: "c-1".to_string(),
            success: true,
            reason: None,
        }
    );
}

#[test]
fn schema_violations_are_rejected() {
    // unknown tag
    assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"weather","temp":3}"#).is_err());
    // missing tag
    assert!(serde_json::from_str::<ServerMessage>(r#"{"tracks":[]}"#).is_err());
    // missing required field
    assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"commandAck","success":true}"#).is_err());
    // wrong type
    assert!(serde_json::from_str::<ServerMessage>(
        r#"{"type":"processListUpdate","processes":[{"pid":"forty-two","name":"x"}]}"#
    )
    .is_err());
}

#[test]
fn device_commands_serialize_flat_with_camel_case_fields() {
    let cmd = DeviceCommand::QueueInsert {
        command_id: "d-7".to_string(),
        track_id: "spotify:track:1".to_string(),
        at_position: 2,
    };
    let value = serde_json::to_value(&cmd).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "queueInsert",
            "commandId": "d-7",
            "trackId": "spotify:track:1",
            "atPosition": 2
        })
    );

    let reorder = DeviceCommand::QueueReorder {
        command_id: "d-8".to_string(),
        ordered_track_ids: vec!["a".to_string(), "b".to_string()],
    };
    let value = serde_json::to_value(&reorder).unwrap();
    assert_eq!(value["type"], "queueReorder");
    assert_eq!(value["orderedTrackIds"], json!(["a", "b"]));

    let mute = serde_json::to_value(DeviceCommand::MuteToggle {
        command_id: "d-9".to_string(),
    })
    .unwrap();
    assert_eq!(mute, json!({"type": "muteToggle", "commandId": "d-9"}));
}

#[test]
fn command_accessors_match_variant() {
    let cmd = DeviceCommand::ProcessKill {
        command_id: "k-1".to_string(),
        pid: 42,
    };
    assert_eq!(cmd.command_id(), "k-1");
    assert_eq!(cmd.kind(), CommandKind::ProcessKill);
    assert_eq!(cmd.kind().to_string(), "processKill");
}
