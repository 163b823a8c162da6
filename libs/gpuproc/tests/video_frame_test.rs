// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Remote video frames: delivery, memoized pixel fetches, and release.

mod common;

use std::sync::Arc;
use std::thread;

use common::{Loopback, WAIT, wait_until};
use crossbeam_channel::Receiver;
use gpuproc::core::identifier::ObjectReference;
use gpuproc::core::messages::ReplyPayload;
use gpuproc::core::video_frame::{
    FrameSize, MediaTime, PixelBuffer, PixelFormat, VideoFrameProperties, VideoRotation,
};
use gpuproc::{
    ClientConnection, ClientMessage, ObjectIdentifier, ProxyConfig, RemoteVideoFrameProxy,
    ServerMessage, Transport,
};

const SIZE: FrameSize = FrameSize {
    width: 8,
    height: 4,
};

fn destination(
    client: &ClientConnection,
) -> (ObjectIdentifier, Receiver<Arc<RemoteVideoFrameProxy>>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let identifier = client.register_video_frame_destination(move |frame| {
        let _ = tx.send(frame);
    });
    (identifier, rx)
}

fn send_frame(
    loopback: &Loopback,
    destination: ObjectIdentifier,
    fill: u8,
) -> VideoFrameProperties {
    let frame = loopback.backend.create_video_frame(
        SIZE,
        PixelFormat::Bgra32,
        MediaTime::new(1001, 30000),
        fill,
    );
    loopback.server.send_video_frame(destination, frame).unwrap()
}

fn raw_properties(reference: ObjectReference) -> VideoFrameProperties {
    VideoFrameProperties {
        reference,
        presentation_time: MediaTime::new(0, 1),
        is_mirrored: false,
        rotation: VideoRotation::None,
        size: SIZE,
        pixel_format: PixelFormat::Bgra32,
    }
}

#[test]
fn test_frame_properties_reach_the_destination() {
    let loopback = Loopback::in_process();
    let (id, frames) = destination(&loopback.client);

    let properties = send_frame(&loopback, id, 1);
    let frame = frames.recv_timeout(WAIT).unwrap();

    assert_eq!(frame.properties(), properties);
    assert_eq!(frame.size(), SIZE);
    assert_eq!(frame.pixel_format(), PixelFormat::Bgra32);
    assert_eq!(frame.presentation_time(), MediaTime::new(1001, 30000));
    assert_eq!(frame.rotation(), VideoRotation::None);
    assert!(!frame.is_mirrored());
    assert!(frame.cached_pixel_buffer().is_none());
    assert!(loopback.server.video_frames().contains(frame.identifier()));
}

#[test]
fn test_concurrent_fetches_share_one_round_trip() {
    let (client, server) = Transport::in_process_pair();
    let connection = ClientConnection::connect(client, &ProxyConfig::default()).unwrap();
    let (id, frames) = destination(&connection);
    let reference = ObjectReference::new(ObjectIdentifier::generate(), 0);
    server
        .outgoing
        .send(ServerMessage::NewVideoFrame {
            destination: id,
            properties: raw_properties(reference),
        })
        .unwrap();
    let frame = frames.recv_timeout(WAIT).unwrap();

    let (async_tx, async_rx) = crossbeam_channel::unbounded();
    for _ in 0..2 {
        let async_tx = async_tx.clone();
        frame.pixel_buffer_async(move |buffer| {
            let _ = async_tx.send(buffer);
        });
    }
    let blocking: Vec<_> = (0..4)
        .map(|_| {
            let frame = Arc::clone(&frame);
            thread::spawn(move || frame.pixel_buffer())
        })
        .collect();

    let reply = match server.incoming.recv_timeout(WAIT).unwrap() {
        ClientMessage::FetchPixelBuffer { reference: read, reply } => {
            assert_eq!(read.0, reference);
            reply
        }
        other => panic!("unexpected {:?}", other),
    };

    // Every caller is parked on the one outstanding request.
    assert!(wait_until(|| frame.pixel_buffer_waiters() == 6));
    assert!(async_rx.try_recv().is_err());
    assert!(blocking.iter().all(|handle| !handle.is_finished()));
    assert_eq!(connection.pending_replies(), 1);

    server
        .outgoing
        .send(ServerMessage::Reply {
            reply,
            result: Ok(ReplyPayload::PixelBuffer(Some(PixelBuffer::filled(
                SIZE,
                PixelFormat::Bgra32,
                9,
            )))),
        })
        .unwrap();

    let blocking: Vec<_> = blocking
        .into_iter()
        .map(|handle| handle.join().unwrap().expect("pixels"))
        .collect();
    let asynchronous: Vec<_> = (0..2)
        .map(|_| async_rx.recv_timeout(WAIT).unwrap().expect("pixels"))
        .collect();

    let first = &blocking[0];
    for buffer in blocking.iter().chain(asynchronous.iter()) {
        assert!(Arc::ptr_eq(first, buffer));
    }
    assert_eq!(
        **first,
        PixelBuffer::filled(SIZE, PixelFormat::Bgra32, 9)
    );
    assert_eq!(frame.pixel_buffer_requests(), 1);
    assert_eq!(frame.pixel_buffer_waiters(), 0);
    assert!(Arc::ptr_eq(first, &frame.cached_pixel_buffer().unwrap()));
    assert!(server.incoming.try_recv().is_err());
}

#[test]
fn test_fetches_over_loopback_reach_the_backend_once() {
    let loopback = Loopback::in_process();
    let (id, frames) = destination(&loopback.client);
    send_frame(&loopback, id, 4);
    let frame = frames.recv_timeout(WAIT).unwrap();

    let first = frame.pixel_buffer().expect("pixels");
    let second = frame.pixel_buffer().expect("pixels");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(*first, PixelBuffer::filled(SIZE, PixelFormat::Bgra32, 4));
    assert_eq!(loopback.backend.count_calls("VideoFrame.pixel_buffer"), 1);
}

#[tokio::test]
async fn test_pixel_buffer_future_resolves() {
    let loopback = Loopback::in_process();
    let (id, frames) = destination(&loopback.client);
    send_frame(&loopback, id, 3);
    let frame = frames.recv_timeout(WAIT).unwrap();

    let first = frame.pixel_buffer_future().await.expect("pixels");
    let second = frame.pixel_buffer_future().await.expect("pixels");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.data.len(), first.len());
    assert_eq!(frame.pixel_buffer_requests(), 1);
}

#[test]
fn test_frame_without_pixels_is_not_cached() {
    let loopback = Loopback::in_process();
    let (id, frames) = destination(&loopback.client);
    let opaque = loopback.backend.create_opaque_video_frame(
        SIZE,
        PixelFormat::Nv12VideoRange,
        MediaTime::new(0, 600),
    );
    loopback.server.send_video_frame(id, opaque).unwrap();
    let frame = frames.recv_timeout(WAIT).unwrap();

    assert!(frame.pixel_buffer().is_none());
    assert!(frame.pixel_buffer().is_none());
    assert_eq!(frame.pixel_buffer_requests(), 2);
    assert!(frame.cached_pixel_buffer().is_none());
}

#[test]
fn test_dropping_the_handle_retires_the_frame() {
    let loopback = Loopback::in_process();
    let (id, frames) = destination(&loopback.client);
    send_frame(&loopback, id, 5);
    let frame = frames.recv_timeout(WAIT).unwrap();
    let identifier = frame.identifier();
    assert!(frame.pixel_buffer().is_some());

    drop(frame);
    assert!(wait_until(|| !loopback.server.video_frames().contains(identifier)));
    assert!(loopback.server.video_frames().is_empty());
}

#[test]
fn test_release_carries_reads_issued() {
    let (client, server) = Transport::in_process_pair();
    let connection = ClientConnection::connect(client, &ProxyConfig::default()).unwrap();
    let (id, frames) = destination(&connection);

    let reference = ObjectReference::new(ObjectIdentifier::generate(), 0);
    server
        .outgoing
        .send(ServerMessage::NewVideoFrame {
            destination: id,
            properties: VideoFrameProperties {
                is_mirrored: true,
                rotation: VideoRotation::Right,
                ..raw_properties(reference)
            },
        })
        .unwrap();
    let frame = frames.recv_timeout(WAIT).unwrap();
    assert!(frame.is_mirrored());

    frame.pixel_buffer_async(|_| {});
    let reply = match server.incoming.recv_timeout(WAIT).unwrap() {
        ClientMessage::FetchPixelBuffer { reference: read, reply } => {
            assert_eq!(read.0, reference);
            reply
        }
        other => panic!("unexpected {:?}", other),
    };
    server
        .outgoing
        .send(ServerMessage::Reply {
            reply,
            result: Ok(ReplyPayload::PixelBuffer(None)),
        })
        .unwrap();

    // Wait for the reply before dropping so the fetch is settled.
    assert!(wait_until(|| connection.pending_replies() == 0));
    drop(frame);

    match server.incoming.recv_timeout(WAIT).unwrap() {
        ClientMessage::ReleaseVideoFrame { reference: write } => {
            assert_eq!(write.reference, reference);
            assert_eq!(write.pending_reads, 1);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_frame_for_missing_destination_is_released_unused() {
    let (client, server) = Transport::in_process_pair();
    let connection = ClientConnection::connect(client, &ProxyConfig::default()).unwrap();
    let (id, frames) = destination(&connection);
    assert!(connection.unregister_video_frame_destination(id));

    let properties = raw_properties(ObjectReference::new(ObjectIdentifier::generate(), 0));
    server
        .outgoing
        .send(ServerMessage::NewVideoFrame {
            destination: id,
            properties,
        })
        .unwrap();

    assert_eq!(
        server.incoming.recv_timeout(WAIT).unwrap(),
        ClientMessage::ReleaseUnusedVideoFrame { properties }
    );
    assert!(frames.try_recv().is_err());
}

#[test]
fn test_unused_release_over_loopback_empties_the_frame_heap() {
    let loopback = Loopback::tcp();
    let (id, _frames) = destination(&loopback.client);
    loopback.client.unregister_video_frame_destination(id);

    send_frame(&loopback, id, 0);
    send_frame(&loopback, id, 0);
    assert!(wait_until(|| loopback.server.video_frames().is_empty()));
    assert_eq!(loopback.backend.count_calls("VideoFrame.pixel_buffer"), 0);
}
