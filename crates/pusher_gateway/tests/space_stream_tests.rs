//! Integration tests for the shared space streams: heartbeat watchdog,
//! demultiplexing, filter admission, and room-stream snooping.

mod common;

use common::*;
use pusher_gateway::back::space_stream::PING_TIMEOUT;
use pusher_gateway::client::ClientFrame as Frame;
use pusher_protocol::filter::{FilterKind, SpaceFilter};
use pusher_protocol::{
    BackId, FieldMask, PusherToClientMessage, RoomOutMessage, SpaceInMessage, SpaceOutMessage,
    SpaceUser,
};
use tokio::time::{advance, Duration};

fn guide(id: u32) -> SpaceUser {
    SpaceUser {
        id,
        uuid: format!("uuid-{id}"),
        name: format!("user-{id}"),
        tags: vec!["guide".to_string()],
        ..Default::default()
    }
}

fn guest(id: u32) -> SpaceUser {
    SpaceUser {
        id,
        uuid: format!("uuid-{id}"),
        name: format!("user-{id}"),
        tags: vec!["guest".to_string()],
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn silent_stream_is_evicted_after_the_watchdog_expires() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");

    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();
    let back_id = h.mux.back_index("space/s");
    assert!(h.mux.has_space_stream(back_id));
    assert_eq!(h.mux.space_count(), 1);

    // No ping for longer than the watchdog tolerates.
    advance(PING_TIMEOUT + Duration::from_secs(1)).await;
    settle().await;

    assert!(!h.mux.has_space_stream(back_id), "stream handle cleared");
    assert_eq!(h.mux.space_count(), 0, "spaces on the back evicted");
    // The client-side mirror was repaired as well.
    assert!(alice.data().spaces.is_empty());
}

#[tokio::test(start_paused = true)]
async fn pings_rearm_the_watchdog_and_are_answered_with_pongs() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");

    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();
    let back_id = h.mux.back_index("space/s");
    let back = h.connector.back(back_id);
    let mut streams = back.take_space_streams();

    // Two ping rounds, each inside the window: the stream stays up past
    // the original deadline.
    for _ in 0..2 {
        advance(PING_TIMEOUT - Duration::from_secs(15)).await;
        settle().await;
        streams[0].outgoing.send(Ok(SpaceOutMessage::Ping)).await.unwrap();
        settle().await;
    }
    assert!(h.mux.has_space_stream(back_id));

    // Each ping produced a pong.
    let mut pongs = 0;
    while let Ok(frame) = streams[0].incoming.try_recv() {
        if matches!(frame, SpaceInMessage::Pong) {
            pongs += 1;
        }
    }
    assert_eq!(pongs, 2);

    // Silence after the last ping still expires the watchdog.
    advance(PING_TIMEOUT + Duration::from_secs(1)).await;
    settle().await;
    assert!(!h.mux.has_space_stream(back_id));
}

#[tokio::test]
async fn kick_off_frames_are_echoed_back() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");
    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();

    let back = h.connector.back(h.mux.back_index("space/s"));
    let mut streams = back.take_space_streams();
    streams[0]
        .outgoing
        .send(Ok(SpaceOutMessage::KickOff {
            space_name: "space/s".to_string(),
            user_id: "uuid-zoe".to_string(),
        }))
        .await
        .unwrap();
    settle().await;

    let mut echoed = false;
    while let Ok(frame) = streams[0].incoming.try_recv() {
        if matches!(
            frame,
            SpaceInMessage::KickOff { ref user_id, .. } if user_id == "uuid-zoe"
        ) {
            echoed = true;
        }
    }
    assert!(echoed, "kickOffMessage must be relayed back");
}

#[tokio::test]
async fn filters_turn_updates_into_adds_for_newly_visible_users() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");

    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();
    h.mux
        .handle_add_space_filter(
            &alice,
            "space/s",
            SpaceFilter {
                name: "guides-only".to_string(),
                kind: FilterKind::HasTag {
                    tag: "guide".to_string(),
                },
            },
        )
        .unwrap();
    let _ = drain_messages(&mut alice_rx);

    let back = h.connector.back(h.mux.back_index("space/s"));
    let mut streams = back.take_space_streams();

    // u1 is a guide (admitted), u2 a guest (filtered out).
    streams[0]
        .outgoing
        .send(Ok(SpaceOutMessage::AddSpaceUser {
            space_name: "space/s".to_string(),
            user: guide(1),
        }))
        .await
        .unwrap();
    streams[0]
        .outgoing
        .send(Ok(SpaceOutMessage::AddSpaceUser {
            space_name: "space/s".to_string(),
            user: guest(2),
        }))
        .await
        .unwrap();
    settle().await;

    let frames = drain_messages(&mut alice_rx);
    let added: Vec<u32> = frames
        .iter()
        .filter_map(|frame| match frame {
            PusherToClientMessage::AddSpaceUser { user, .. } => Some(user.id),
            _ => None,
        })
        .collect();
    assert_eq!(added, vec![1], "only the admitted user is delivered");

    // u2 becomes a guide via a masked update: it was invisible before, so
    // the watcher gets an add, not an update.
    streams[0]
        .outgoing
        .send(Ok(SpaceOutMessage::UpdateSpaceUser {
            space_name: "space/s".to_string(),
            user: guide(2),
            update_mask: FieldMask::new(["tags"]),
        }))
        .await
        .unwrap();
    settle().await;

    let frames = drain_messages(&mut alice_rx);
    assert!(
        frames.iter().any(|frame| matches!(
            frame,
            PusherToClientMessage::AddSpaceUser { user, .. } if user.id == 2
        )),
        "newly admitted user must arrive as addSpaceUser, got {frames:?}"
    );
    assert!(
        !frames
            .iter()
            .any(|frame| matches!(frame, PusherToClientMessage::UpdateSpaceUser { .. })),
        "no update frame for a previously invisible user"
    );
}

#[tokio::test]
async fn invalid_metadata_frames_are_dropped_and_valid_ones_merge() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");
    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();
    let _ = drain_messages(&mut alice_rx);

    let back = h.connector.back(h.mux.back_index("space/s"));
    let mut streams = back.take_space_streams();

    // Garbage metadata: dropped, stream survives.
    streams[0]
        .outgoing
        .send(Ok(SpaceOutMessage::UpdateSpaceMetadata {
            space_name: "space/s".to_string(),
            metadata: "{not json".to_string(),
        }))
        .await
        .unwrap();
    settle().await;
    assert!(drain_messages(&mut alice_rx).is_empty());
    assert_eq!(h.mux.space_count(), 1);

    // Two valid updates merge-overwrite by key.
    for blob in [r#"{"stage":"open"}"#, r#"{"speaker":"zoe"}"#] {
        streams[0]
            .outgoing
            .send(Ok(SpaceOutMessage::UpdateSpaceMetadata {
                space_name: "space/s".to_string(),
                metadata: blob.to_string(),
            }))
            .await
            .unwrap();
    }
    settle().await;

    let frames = drain_messages(&mut alice_rx);
    assert_eq!(
        frames
            .iter()
            .filter(|f| matches!(f, PusherToClientMessage::UpdateSpaceMetadata { .. }))
            .count(),
        2
    );
    let snapshot = h.mux.space("space/s").unwrap().metadata_snapshot();
    assert_eq!(snapshot.get("stage"), Some(&serde_json::json!("open")));
    assert_eq!(snapshot.get("speaker"), Some(&serde_json::json!("zoe")));
}

#[tokio::test]
async fn room_stream_snoops_join_and_gates_refreshes() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");
    h.mux.handle_join_room(&alice).await.unwrap();

    let back = h.connector.back(BackId(0));
    let mut streams = back.take_room_streams();

    streams[0]
        .outgoing
        .send(Ok(RoomOutMessage::RoomJoined {
            current_user_id: 11,
            can_edit: true,
            tags: vec!["editor".to_string()],
        }))
        .await
        .unwrap();
    settle().await;

    // Snooped fields landed in the session.
    assert_eq!(alice.user_id(), Some(11));
    assert!(alice.data().can_edit);
    assert_eq!(alice.data().space_user.id, 11);
    // And the frame itself still reached the client.
    let frames = drain_messages(&mut alice_rx);
    assert!(frames
        .iter()
        .any(|f| matches!(f, PusherToClientMessage::RoomJoined { .. })));

    // Version gating: same version twice forwards once.
    for _ in 0..2 {
        streams[0]
            .outgoing
            .send(Ok(RoomOutMessage::RefreshRoom {
                room_id: "room/x".to_string(),
                version_number: 1,
            }))
            .await
            .unwrap();
    }
    settle().await;
    let refreshes = drain_messages(&mut alice_rx)
        .into_iter()
        .filter(|f| matches!(f, PusherToClientMessage::RefreshRoom { .. }))
        .count();
    assert_eq!(refreshes, 1);

    // A higher version goes through again.
    streams[0]
        .outgoing
        .send(Ok(RoomOutMessage::RefreshRoom {
            room_id: "room/x".to_string(),
            version_number: 2,
        }))
        .await
        .unwrap();
    settle().await;
    let refreshes = drain_messages(&mut alice_rx)
        .into_iter()
        .filter(|f| matches!(f, PusherToClientMessage::RefreshRoom { .. }))
        .count();
    assert_eq!(refreshes, 1);
}

#[tokio::test]
async fn losing_the_room_stream_closes_the_socket_with_1011() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");
    h.mux.handle_join_room(&alice).await.unwrap();

    let back = h.connector.back(BackId(0));
    let streams = back.take_room_streams();
    drop(streams); // the back goes away
    settle().await;

    let mut close = None;
    while let Ok(frame) = alice_rx.try_recv() {
        if let Frame::Close { code, reason } = frame {
            close = Some((code, reason));
        }
    }
    let (code, reason) = close.expect("socket close requested");
    assert_eq!(code, pusher_protocol::CLOSE_CODE_BACK_LOST);
    assert!(reason.contains("back"));
}

#[tokio::test]
async fn disconnecting_clients_are_not_re_closed() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");
    h.mux.handle_join_room(&alice).await.unwrap();

    let back = h.connector.back(BackId(0));
    let streams = back.take_room_streams();

    // Teardown already started; the stream loss must not race a second
    // close onto the socket.
    alice.begin_disconnect();
    drop(streams);
    settle().await;

    while let Ok(frame) = alice_rx.try_recv() {
        assert!(
            !matches!(frame, Frame::Close { .. }),
            "no close frame for an already-disconnecting client"
        );
    }
}
