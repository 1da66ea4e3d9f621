//! Integration tests for the session multiplexer: room and space
//! lifecycles, creation races, player-detail diffs, and admin fan-out.

mod common;

use common::*;
use pusher_protocol::types::AvailabilityStatus;
use pusher_protocol::{
    BackId, PusherToClientMessage, RoomInMessage, RoomOutMessage, SetPlayerDetails, SpaceInMessage,
};

#[tokio::test]
async fn two_clients_share_one_room() {
    let h = harness(1);
    let (alice, _alice_rx) = client_in_room("room/x", "alice");
    let (bob, _bob_rx) = client_in_room("room/x", "bob");

    h.mux.handle_join_room(&alice).await.unwrap();
    h.mux.handle_join_room(&bob).await.unwrap();

    assert_eq!(h.mux.room_count(), 1);
    assert!(h.mux.has_room("room/x"));

    // One room stream and one join frame per client went downstream.
    let back = h.connector.back(BackId(0));
    let mut streams = back.take_room_streams();
    assert_eq!(streams.len(), 2);
    for stream in &mut streams {
        match stream.incoming.recv().await {
            Some(RoomInMessage::JoinRoom { room_id, .. }) => assert_eq!(room_id, "room/x"),
            other => panic!("expected joinRoomMessage, got {other:?}"),
        }
    }

    // Closing one client leaves the room alive for the other.
    h.mux.disconnect(&alice).await;
    assert!(h.mux.has_room("room/x"));
    assert_eq!(h.mux.room_count(), 1);

    // Closing the last client disposes the room.
    h.mux.disconnect(&bob).await;
    assert_eq!(h.mux.room_count(), 0);
}

#[tokio::test]
async fn concurrent_joins_create_one_room() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");
    let (bob, _brx) = client_in_room("room/x", "bob");

    let (ra, rb) = tokio::join!(
        h.mux.handle_join_room(&alice),
        h.mux.handle_join_room(&bob)
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(h.mux.room_count(), 1);
    // Exactly one zone feed was opened: one PusherRoom was initialized.
    let back = h.connector.back(BackId(0));
    assert_eq!(back.take_zone_feeds().len(), 1);
}

#[tokio::test]
async fn spaces_on_one_back_share_the_stream() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");
    let (bob, _brx) = client_in_room("room/x", "bob");

    // Both spaces resolve to the single configured back-end.
    let (ra, rb) = tokio::join!(
        h.mux
            .handle_join_space(&alice, "space/s1".to_string(), "s1".to_string()),
        h.mux
            .handle_join_space(&bob, "space/s2".to_string(), "s2".to_string()),
    );
    ra.unwrap();
    rb.unwrap();

    let back = h.connector.back(BackId(0));
    assert_eq!(h.connector.connect_count(), 1);
    assert_eq!(back.watch_space_calls(), 1);
    assert_eq!(h.mux.space_stream_count(), 1);
    assert_eq!(h.mux.space_count(), 2);

    // Two joinSpaceMessage frames went out over the one shared stream.
    let mut streams = back.take_space_streams();
    assert_eq!(streams.len(), 1);
    let mut joined = Vec::new();
    for _ in 0..2 {
        match streams[0].incoming.recv().await {
            Some(SpaceInMessage::JoinSpace { space_name }) => joined.push(space_name),
            other => panic!("expected joinSpaceMessage, got {other:?}"),
        }
    }
    joined.sort();
    assert_eq!(joined, vec!["space/s1".to_string(), "space/s2".to_string()]);
}

#[tokio::test]
async fn leaving_the_last_space_disposes_the_shared_stream() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");

    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();
    let back_id = h.mux.back_index("space/s");
    assert!(h.mux.has_space_stream(back_id));

    h.mux.handle_leave_space(&alice, "space/s").await.unwrap();

    // Empty space removed, and with no space left on that back-end the
    // shared stream is gone too.
    assert_eq!(h.mux.space_count(), 0);
    assert!(!h.mux.has_space_stream(back_id));
    assert_eq!(h.mux.space_stream_count(), 0);

    // The back saw the leave announcement.
    let back = h.connector.back(back_id);
    let mut streams = back.take_space_streams();
    let mut saw_leave = false;
    while let Ok(frame) = streams[0].incoming.try_recv() {
        if matches!(frame, SpaceInMessage::LeaveSpace { ref space_name } if space_name == "space/s")
        {
            saw_leave = true;
        }
    }
    assert!(saw_leave, "leaveSpaceMessage expected on dispose");
}

#[tokio::test]
async fn watcher_sets_stay_linked_to_client_space_lists() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");

    h.mux
        .handle_join_space(&alice, "space/a".to_string(), "a".to_string())
        .await
        .unwrap();
    h.mux
        .handle_join_space(&alice, "space/b".to_string(), "b".to_string())
        .await
        .unwrap();

    // Bidirectional link: every space in the client list counts the client
    // as a watcher.
    for name in alice.data().spaces.clone() {
        let space = h.mux.space(&name).expect("space exists");
        assert!(space.watchers().iter().any(|w| w.id() == alice.id()));
    }

    h.mux.leave_spaces(&alice).await;
    assert!(alice.data().spaces.is_empty());
    assert_eq!(h.mux.space_count(), 0);
}

#[tokio::test]
async fn player_details_diff_masks_only_changed_fields() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");

    h.mux.handle_join_room(&alice).await.unwrap();

    // Complete the join so the back-assigned id exists.
    let back = h.connector.back(BackId(0));
    let mut room_streams = back.take_room_streams();
    room_streams[0]
        .outgoing
        .send(Ok(RoomOutMessage::RoomJoined {
            current_user_id: 7,
            can_edit: false,
            tags: vec![],
        }))
        .await
        .unwrap();
    settle().await;
    assert_eq!(alice.user_id(), Some(7));

    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();

    // Seed the canonical record the diff runs against.
    {
        let mut data = alice.data_mut();
        data.space_user.availability_status = AvailabilityStatus::Online;
        data.space_user.chat_id = "old".to_string();
    }
    let _ = drain_messages(&mut alice_rx);

    h.mux
        .handle_set_player_details(
            &alice,
            SetPlayerDetails {
                availability_status: AvailabilityStatus::Online,
                chat_id: "new".to_string(),
            },
        )
        .await
        .unwrap();

    // The space stream received an updateSpaceUser with exactly ["chatID"].
    let mut space_streams = back.take_space_streams();
    let mut mask_paths = None;
    while let Ok(frame) = space_streams[0].incoming.try_recv() {
        if let SpaceInMessage::UpdateSpaceUser { update_mask, user, .. } = frame {
            assert_eq!(user.chat_id, "new");
            mask_paths = Some(update_mask.paths);
        }
    }
    assert_eq!(mask_paths, Some(vec!["chatID".to_string()]));

    // The watcher (Alice herself) got the masked update, not an add.
    let frames = drain_messages(&mut alice_rx);
    assert!(frames.iter().any(|frame| matches!(
        frame,
        PusherToClientMessage::UpdateSpaceUser { update_mask, .. }
            if update_mask.paths == vec!["chatID".to_string()]
    )));

    // The new chat id was persisted through the admin service.
    assert_eq!(
        h.admin.chat_id_updates.lock().unwrap().as_slice(),
        &[("uuid-alice".to_string(), "new".to_string())]
    );
}

#[tokio::test]
async fn unchanged_details_emit_no_space_update() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");

    h.mux.handle_join_room(&alice).await.unwrap();
    let back = h.connector.back(BackId(0));
    let mut room_streams = back.take_room_streams();
    room_streams[0]
        .outgoing
        .send(Ok(RoomOutMessage::RoomJoined {
            current_user_id: 9,
            can_edit: false,
            tags: vec![],
        }))
        .await
        .unwrap();
    settle().await;

    h.mux
        .handle_join_space(&alice, "space/s".to_string(), "s".to_string())
        .await
        .unwrap();
    {
        let mut data = alice.data_mut();
        data.space_user.availability_status = AvailabilityStatus::Online;
        data.space_user.chat_id = "same".to_string();
    }

    h.mux
        .handle_set_player_details(
            &alice,
            SetPlayerDetails {
                availability_status: AvailabilityStatus::Online,
                chat_id: "same".to_string(),
            },
        )
        .await
        .unwrap();

    let mut space_streams = back.take_space_streams();
    while let Ok(frame) = space_streams[0].incoming.try_recv() {
        assert!(
            !matches!(frame, SpaceInMessage::UpdateSpaceUser { .. }),
            "empty diff must not broadcast an update"
        );
    }
    assert!(
        h.admin.chat_id_updates.lock().unwrap().is_empty(),
        "an unchanged chat id must not be re-persisted"
    );
}

#[tokio::test]
async fn world_broadcast_reaches_every_room_once() {
    let admin = FakeAdminService::with_same_world_rooms(vec!["room/r1", "room/r2", "room/r3"]);
    let h = harness_with_admin(1, admin);
    let (chief, _crx) = client_with_tags("room/r1", "chief", vec!["admin".to_string()]);

    h.mux
        .emit_play_global_message(&chief, "maintenance in 5 minutes", "message", true)
        .await
        .unwrap();

    let back = h.connector.back(BackId(0));
    let broadcasts = back.room_broadcasts();
    assert_eq!(broadcasts.len(), 3);
    let mut rooms: Vec<&str> = broadcasts.iter().map(|b| b.room_id.as_str()).collect();
    rooms.sort();
    assert_eq!(rooms, vec!["room/r1", "room/r2", "room/r3"]);
    assert!(broadcasts
        .iter()
        .all(|b| b.message == "maintenance in 5 minutes"));
}

#[tokio::test]
async fn global_broadcast_requires_the_admin_tag() {
    let h = harness(1);
    let (pleb, _prx) = client_in_room("room/r1", "pleb");

    let result = h
        .mux
        .emit_play_global_message(&pleb, "hi", "message", true)
        .await;
    assert!(result.is_err());

    let back = h.connector.back(BackId(0));
    assert!(back.room_broadcasts().is_empty());
}

#[tokio::test]
async fn space_ops_on_unknown_spaces_list_known_ones() {
    let h = harness(1);
    let (alice, _arx) = client_in_room("room/x", "alice");
    h.mux
        .handle_join_space(&alice, "space/known".to_string(), "known".to_string())
        .await
        .unwrap();

    let err = h
        .mux
        .handle_leave_space(&alice, "space/other")
        .await
        .unwrap_err();
    let text = err.to_string();
    assert!(text.contains("space/other"));
    assert!(text.contains("space/known"));
}

#[tokio::test]
async fn queries_answer_with_the_inbound_id() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");

    h.mux
        .handle_query(&alice, 42, pusher_protocol::QueryKind::RoomTags)
        .await;

    let frames = drain_messages(&mut alice_rx);
    match frames.as_slice() {
        [PusherToClientMessage::Answer { id, answer }] => {
            assert_eq!(*id, 42);
            assert!(matches!(
                answer,
                pusher_protocol::AnswerKind::RoomTags { tags } if tags == &vec!["admin".to_string()]
            ));
        }
        other => panic!("expected one answer, got {other:?}"),
    }
}

#[tokio::test]
async fn edit_without_grant_is_rejected_with_an_error_frame() {
    let h = harness(1);
    let (alice, mut alice_rx) = client_in_room("room/x", "alice");
    h.mux.handle_join_room(&alice).await.unwrap();
    let _ = drain_messages(&mut alice_rx);

    h.mux
        .handle_edit_map(&alice, "op-1".to_string(), serde_json::json!({"op": "place"}))
        .await
        .unwrap();

    let frames = drain_messages(&mut alice_rx);
    assert!(frames
        .iter()
        .any(|f| matches!(f, PusherToClientMessage::Error { .. })));

    // Nothing was forwarded downstream.
    let back = h.connector.back(BackId(0));
    let mut streams = back.take_room_streams();
    let mut saw_edit = false;
    while let Ok(frame) = streams[0].incoming.try_recv() {
        if matches!(frame, RoomInMessage::EditMapCommand { .. }) {
            saw_edit = true;
        }
    }
    assert!(!saw_edit);
}
