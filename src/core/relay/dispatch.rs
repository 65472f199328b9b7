//! Upstream event loop and content handlers.
//!
//! Events are handled one at a time and items of a response strictly in
//! order. Within one message item, text and audio content entries run on two
//! concurrent lanes, since each content entry carries its own completion.
//! When one lane fails the others stop, and every stream that already sent
//! something to the client is closed with its `text_done`.

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::codec::ContentRef;
use super::error::{RelayError, RelayResult};
use super::outbound::ClientSink;
use crate::core::realtime::{
    AudioContent, ChunkStream, ContentEntry, InputAudioEvent, MessageItem, OutputItem,
    ResponseEvent, TextContent, UpstreamEvent, UpstreamEvents,
};

/// Drive the upstream event sequence until it ends or an event fails.
///
/// A failed event ends the loop: the state of its open content streams can
/// no longer be trusted.
pub async fn run_event_loop(mut events: UpstreamEvents, sink: ClientSink) -> RelayResult<()> {
    while let Some(event) = events.next().await {
        let event = event.map_err(RelayError::UpstreamStream)?;
        debug!(kind = event.kind(), "Dispatching upstream event");
        dispatch_event(event, &sink).await?;
    }
    debug!("Upstream event sequence ended");
    Ok(())
}

pub async fn dispatch_event(event: UpstreamEvent, sink: &ClientSink) -> RelayResult<()> {
    match event {
        UpstreamEvent::Response(response) => dispatch_response(response, sink).await,
        UpstreamEvent::InputAudio(input) => dispatch_input_audio(input, sink).await,
    }
}

async fn dispatch_response(response: ResponseEvent, sink: &ClientSink) -> RelayResult<()> {
    let ResponseEvent { id, mut items } = response;

    while let Some(item) = items.next().await {
        match item.map_err(RelayError::UpstreamStream)? {
            OutputItem::Message(message) => dispatch_message(message, sink).await?,
            OutputItem::Other { id: item_id, kind } => {
                debug!(response_id = %id, item_id = %item_id, kind = %kind, "Skipping output item");
            }
        }
    }
    Ok(())
}

async fn dispatch_message(message: MessageItem, sink: &ClientSink) -> RelayResult<()> {
    let MessageItem {
        id: item_id,
        mut contents,
    } = message;
    let item = item_id.as_str();

    let (text_tx, mut text_rx) = mpsc::unbounded_channel::<TextContent>();
    let (audio_tx, mut audio_rx) = mpsc::unbounded_channel::<AudioContent>();

    // Cancelled by the first lane to fail; the others close what they opened
    let token = CancellationToken::new();
    let cancel = &token;

    // Senders drop when routing finishes, which ends both lanes
    let route = async move {
        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                entry = contents.next() => entry,
            };
            let Some(entry) = entry else { break };
            match entry {
                Ok(ContentEntry::Text(text)) => {
                    let _ = text_tx.send(text);
                }
                Ok(ContentEntry::Audio(audio)) => {
                    let _ = audio_tx.send(audio);
                }
                Ok(ContentEntry::Other { index, kind }) => {
                    debug!(item_id = %item, index, kind = %kind, "Skipping content entry");
                }
                Err(e) => {
                    cancel.cancel();
                    return Err(RelayError::UpstreamStream(e));
                }
            }
        }
        Ok::<(), RelayError>(())
    };

    let text_lane = async {
        while let Some(text) = next_entry(&mut text_rx, cancel).await {
            let reference = ContentRef::new(item, text.index);
            if let Err(e) = relay_text(reference, text.chunks, sink, cancel).await {
                cancel.cancel();
                return Err(e);
            }
        }
        Ok::<(), RelayError>(())
    };

    let audio_lane = async {
        while let Some(audio) = next_entry(&mut audio_rx, cancel).await {
            let reference = ContentRef::new(item, audio.index);
            if let Err(e) =
                relay_audio(reference, audio.audio, audio.transcript, sink, cancel).await
            {
                cancel.cancel();
                return Err(e);
            }
        }
        Ok::<(), RelayError>(())
    };

    let (routed, texts, audios) = tokio::join!(route, text_lane, audio_lane);
    routed.and(texts).and(audios)
}

async fn next_entry<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    cancel: &CancellationToken,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        entry = rx.recv() => entry,
    }
}

/// How draining one chunk sequence ended.
#[derive(Debug)]
enum StreamEnd {
    Complete,
    Cancelled,
    Failed(RelayError),
}

impl StreamEnd {
    /// Merge the ends of two branches of one content stream; a failure wins.
    fn or(self, other: StreamEnd) -> StreamEnd {
        match (self, other) {
            (StreamEnd::Failed(e), _) | (_, StreamEnd::Failed(e)) => StreamEnd::Failed(e),
            (StreamEnd::Cancelled, _) | (_, StreamEnd::Cancelled) => StreamEnd::Cancelled,
            _ => StreamEnd::Complete,
        }
    }
}

/// Forward every chunk of `chunks` until it ends, fails or `cancel` fires.
///
/// `opened` is set once the first chunk reached the client.
async fn forward_chunks<T, F, Fut>(
    chunks: &mut ChunkStream<T>,
    cancel: &CancellationToken,
    opened: &mut bool,
    mut forward: F,
) -> StreamEnd
where
    T: 'static,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = RelayResult<()>>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = chunks.next() => next,
        };
        let chunk = match next {
            None => return StreamEnd::Complete,
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => return StreamEnd::Failed(RelayError::UpstreamStream(e)),
        };
        if let Err(e) = forward(chunk).await {
            return StreamEnd::Failed(e);
        }
        *opened = true;
    }
}

/// Forward every text fragment as a `text_delta`, then close the stream.
pub async fn relay_text(
    reference: ContentRef,
    mut chunks: ChunkStream<String>,
    sink: &ClientSink,
    cancel: &CancellationToken,
) -> RelayResult<()> {
    let mut opened = false;
    let id = &reference;
    let end = forward_chunks(&mut chunks, cancel, &mut opened, move |delta| {
        sink.text_delta(id, delta)
    })
    .await;

    finish_stream(&reference, opened, end, sink).await
}

/// Forward audio frames and transcript fragments concurrently.
///
/// Only the transcript closes the stream with `text_done`. If either branch
/// fails the other is cancelled.
pub async fn relay_audio(
    reference: ContentRef,
    mut audio: ChunkStream<Bytes>,
    mut transcript: ChunkStream<String>,
    sink: &ClientSink,
    cancel: &CancellationToken,
) -> RelayResult<()> {
    let branches = cancel.child_token();
    let mut frames_sent = false;
    let mut deltas_sent = false;
    let id = &reference;

    let forward_audio = async {
        let end = forward_chunks(&mut audio, &branches, &mut frames_sent, move |frame| {
            sink.audio(frame)
        })
        .await;
        if matches!(end, StreamEnd::Failed(_)) {
            branches.cancel();
        }
        end
    };

    let forward_transcript = async {
        let end = forward_chunks(&mut transcript, &branches, &mut deltas_sent, move |delta| {
            sink.text_delta(id, delta)
        })
        .await;
        if matches!(end, StreamEnd::Failed(_)) {
            branches.cancel();
        }
        end
    };

    let (audio_end, transcript_end) = tokio::join!(forward_audio, forward_transcript);
    finish_stream(
        &reference,
        frames_sent || deltas_sent,
        audio_end.or(transcript_end),
        sink,
    )
    .await
}

/// Emit the single `text_done` for `reference`.
///
/// A stream that completes is always closed. A failed or cancelled stream is
/// closed only if it was opened, and never once the client is gone; the
/// original error wins.
async fn finish_stream(
    reference: &ContentRef,
    opened: bool,
    end: StreamEnd,
    sink: &ClientSink,
) -> RelayResult<()> {
    match end {
        StreamEnd::Complete => sink.text_done(reference).await,
        StreamEnd::Failed(err @ RelayError::Transport(_)) => Err(err),
        StreamEnd::Failed(err) => {
            if opened {
                close_abandoned(reference, sink).await;
            }
            Err(err)
        }
        StreamEnd::Cancelled => {
            if opened {
                close_abandoned(reference, sink).await;
            }
            Ok(())
        }
    }
}

async fn close_abandoned(reference: &ContentRef, sink: &ClientSink) {
    if sink.is_closed() {
        debug!(id = %reference, "Client gone, leaving content stream open");
        return;
    }
    if let Err(e) = sink.text_done(reference).await {
        debug!(id = %reference, "Could not close content stream: {}", e);
    }
}

async fn dispatch_input_audio(input: InputAudioEvent, sink: &ClientSink) -> RelayResult<()> {
    let InputAudioEvent {
        item_id,
        completion,
    } = input;

    sink.speech_started().await?;
    let text = completion.await.map_err(RelayError::UpstreamStream)?;
    sink.transcription(item_id, text.unwrap_or_default()).await
}
