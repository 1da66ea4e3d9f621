//! Routes decoded client frames to the multiplexer.

use crate::client::ClientSession;
use crate::error::GatewayError;
use crate::multiplexer::SessionMultiplexer;
use pusher_protocol::ClientToPusherMessage;
use std::sync::Arc;
use tracing::debug;

/// Dispatches one client frame. The match is total: every tag the decoder
/// accepts has a handler; undecodable tags never reach this point.
pub async fn route_client_message(
    mux: &Arc<SessionMultiplexer>,
    client: &Arc<ClientSession>,
    message: ClientToPusherMessage,
) -> Result<(), GatewayError> {
    match message {
        ClientToPusherMessage::Viewport { viewport } => {
            mux.handle_viewport(client, viewport).await
        }
        ClientToPusherMessage::UserMoves(moves) => mux.handle_user_moves(client, moves).await,
        ClientToPusherMessage::SetPlayerDetails(details) => {
            mux.handle_set_player_details(client, details).await
        }
        ClientToPusherMessage::EmotePrompt { emote } => {
            mux.handle_emote_prompt(client, emote).await
        }
        ClientToPusherMessage::EditMapCommand { id, command } => {
            mux.handle_edit_map(client, id, command).await
        }
        ClientToPusherMessage::JoinSpace {
            space_name,
            local_name,
        } => mux.handle_join_space(client, space_name, local_name).await,
        ClientToPusherMessage::LeaveSpace { space_name } => {
            mux.handle_leave_space(client, &space_name).await
        }
        ClientToPusherMessage::UpdateSpaceMetadata {
            space_name,
            metadata,
        } => {
            mux.handle_update_space_metadata(client, &space_name, metadata)
                .await
        }
        ClientToPusherMessage::AddSpaceFilter { space_name, filter } => {
            mux.handle_add_space_filter(client, &space_name, filter)
        }
        ClientToPusherMessage::UpdateSpaceFilter { space_name, filter } => {
            mux.handle_update_space_filter(client, &space_name, filter)
        }
        ClientToPusherMessage::RemoveSpaceFilter {
            space_name,
            filter_name,
        } => mux.handle_remove_space_filter(client, &space_name, &filter_name),
        ClientToPusherMessage::UpdateSpaceUser {
            space_name,
            user,
            update_mask,
        } => {
            mux.handle_update_space_user(client, &space_name, user, update_mask)
                .await
        }
        ClientToPusherMessage::PublicEvent {
            space_name,
            space_event,
        } => mux.handle_public_event(client, &space_name, space_event).await,
        ClientToPusherMessage::PrivateEvent {
            space_name,
            receiver_user_id,
            space_event,
        } => {
            mux.handle_private_event(client, &space_name, receiver_user_id, space_event)
                .await
        }
        ClientToPusherMessage::KickOffUser {
            space_name,
            user_id,
        } => mux.handle_kick_off_user(client, &space_name, user_id).await,
        ClientToPusherMessage::Query { id, query } => {
            mux.handle_query(client, id, query).await;
            Ok(())
        }
        ClientToPusherMessage::ReportPlayer {
            reported_user_uuid,
            report_comment,
        } => {
            mux.handle_report_player(client, reported_user_uuid, report_comment)
                .await
        }
        ClientToPusherMessage::BanUserByUuid {
            user_uuid,
            user_name,
            message,
        } => mux.emit_ban(client, &user_uuid, &user_name, &message).await,
        ClientToPusherMessage::SendUserMessage { user_uuid, message } => {
            mux.emit_send_user_message(client, &user_uuid, &message).await
        }
        ClientToPusherMessage::PlayGlobal {
            content,
            r#type,
            broadcast_to_world,
        } => {
            debug!("📢 Global message from {}", client.id());
            mux.emit_play_global_message(client, &content, &r#type, broadcast_to_world)
                .await
        }
    }
}
