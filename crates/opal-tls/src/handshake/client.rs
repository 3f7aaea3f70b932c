//! TLS 1.3 client handshake automaton.
//!
//! ```text
//! Start --ClientHello--> WaitServerHello --HRR--> WaitServerHello
//!   WaitServerHello --ServerHello--> WaitEncryptedExtensions
//!   WaitEncryptedExtensions --(PSK)--> WaitFinished
//!   WaitEncryptedExtensions --(cert)--> WaitCertOrCertRequest
//!     --Certificate--> WaitCertificateVerify --> WaitFinished
//!     --CertificateRequest--> WaitCertificate --> WaitCertificateVerify
//!   WaitFinished --Finished--> Connected (sending the second flight)
//! ```

use super::codec::{
    CertificateMsg, CertificateVerify, ClientHello, EncryptedExtensions, Finished,
    HandshakeBody, HandshakeMessage, HelloRetryRequest, KeyShareEntry, OfferedPsks, PskIdentity,
    ServerHello,
};
use super::connected_next;
use super::context::ConnectionContext;
use super::key_exchange::{key_agreement, KeyExchange};
use super::negotiate::certificate_selection;
use super::signing::sign_certificate_verify;
use super::verify::{handshake_transcript_hash, verify_certificate_verify};
use crate::alert::Alert;
use crate::crypt::key_schedule::KeySchedule;
use crate::crypt::CipherSuiteParams;
use crate::TLS13_VERSION;
use log::{debug, warn};
use opal_types::TlsError;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// The client automaton. Exactly one state exists per connection; a
/// transition consumes it and returns its successor, or a fatal alert with
/// no successor and no output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Start,
    WaitServerHello,
    WaitEncryptedExtensions,
    WaitCertOrCertRequest,
    WaitCertificate,
    WaitCertificateVerify,
    WaitFinished,
    Connected,
}

impl ClientState {
    /// Advance the automaton. `None` input is valid only in `Start`.
    pub fn next(
        self,
        ctx: &mut ConnectionContext,
        input: Option<HandshakeMessage>,
    ) -> Result<(ClientState, Vec<HandshakeMessage>), Alert> {
        match self {
            ClientState::Start => match input {
                None => send_client_hello(ctx),
                Some(_) => Err(Alert::UnexpectedMessage),
            },
            ClientState::WaitServerHello => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::HelloRetryRequest(hrr) => {
                        process_hello_retry_request(ctx, hrr, message)
                    }
                    HandshakeBody::ServerHello(sh) => process_server_hello(ctx, sh, message),
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ClientState::WaitEncryptedExtensions => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::EncryptedExtensions(ee) => {
                        process_encrypted_extensions(ctx, ee, message)
                    }
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ClientState::WaitCertOrCertRequest => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::Certificate(cert) => {
                        ctx.server_certificate = Some(cert);
                        ctx.server_first_flight.push(message);
                        debug!("[ClientWaitCertOrCertRequest] -> [ClientWaitCertificateVerify]");
                        Ok((ClientState::WaitCertificateVerify, Vec::new()))
                    }
                    HandshakeBody::CertificateRequest(cr) => {
                        ctx.params.using_client_auth = true;
                        ctx.server_certificate_request = Some(cr);
                        ctx.server_first_flight.push(message);
                        debug!("[ClientWaitCertOrCertRequest] -> [ClientWaitCertificate]");
                        Ok((ClientState::WaitCertificate, Vec::new()))
                    }
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ClientState::WaitCertificate => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::Certificate(cert) => {
                        ctx.server_certificate = Some(cert);
                        ctx.server_first_flight.push(message);
                        debug!("[ClientWaitCertificate] -> [ClientWaitCertificateVerify]");
                        Ok((ClientState::WaitCertificateVerify, Vec::new()))
                    }
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ClientState::WaitCertificateVerify => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::CertificateVerify(cv) => {
                        process_certificate_verify(ctx, cv, message)
                    }
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ClientState::WaitFinished => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::Finished(fin) => process_server_finished(ctx, fin, message),
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ClientState::Connected => connected_next(ClientState::Connected, input),
        }
    }
}

fn internal(err: TlsError) -> Alert {
    debug!("internal failure: {err}");
    Alert::InternalError
}

/// Build and send the ClientHello; offer key shares for every supported
/// group, and a PSK (with its binder) when the store has one for the
/// target server.
fn send_client_hello(
    ctx: &mut ConnectionContext,
) -> Result<(ClientState, Vec<HandshakeMessage>), Alert> {
    ctx.params.server_name = ctx.opts.server_name.clone();

    let mut key_shares = Vec::with_capacity(ctx.caps.groups.len());
    for (_, mut private_key) in ctx.offered_dh.drain() {
        private_key.zeroize();
    }
    for group in &ctx.caps.groups {
        let kx = KeyExchange::generate(*group).map_err(internal)?;
        key_shares.push(KeyShareEntry {
            group: *group,
            key_exchange: kx.public_key_bytes().to_vec(),
        });
        ctx.offered_dh.insert(*group, kx.into_private_key_bytes());
    }

    let mut random = [0u8; 32];
    getrandom::getrandom(&mut random).map_err(|_| Alert::InternalError)?;

    let mut ch = ClientHello {
        random,
        cipher_suites: ctx.caps.cipher_suites.clone(),
        supported_versions: vec![TLS13_VERSION],
        server_name: ctx.opts.server_name.clone(),
        key_shares,
        supported_groups: ctx.caps.groups.clone(),
        signature_schemes: ctx.caps.signature_schemes.clone(),
        psk_modes: ctx.caps.psk_modes.clone(),
        alpn_protocols: ctx.opts.next_protos.clone(),
        ..Default::default()
    };

    // PSK and early data are settled last, so the binder can cover the rest
    // of the hello.
    let name_key = ctx.opts.server_name.clone().unwrap_or_default();
    match ctx.caps.psks.get(name_key.as_bytes()).cloned() {
        Some(psk) => {
            let psk_params =
                CipherSuiteParams::from_suite(psk.cipher_suite).map_err(internal)?;
            ch.cipher_suites.retain(|suite| {
                CipherSuiteParams::from_suite(*suite)
                    .map(|p| p.hash == psk_params.hash)
                    .unwrap_or(false)
            });
            if ch.cipher_suites.is_empty() {
                warn!("[ClientStart] no offered suite matches the PSK hash");
                return Err(Alert::InternalError);
            }
            if !ctx.opts.early_data.is_empty() {
                ch.early_data = true;
            }
            ch.pre_shared_key = Some(OfferedPsks {
                identities: vec![PskIdentity {
                    identity: psk.identity.clone(),
                    obfuscated_ticket_age: 0,
                }],
                binders: vec![vec![0u8; psk_params.hash_len]],
            });

            ctx.key_schedule
                .pre_init(psk.cipher_suite, &psk.key, psk.external)
                .map_err(internal)?;
            let truncated = ch.encode_truncated().map_err(internal)?;
            let binder = ctx.key_schedule.compute_binder(&truncated).map_err(internal)?;
            if let Some(offer) = ch.pre_shared_key.as_mut() {
                offer.binders[0] = binder;
            }
            ctx.offered_psk = Some(psk);
        }
        None if !ctx.opts.early_data.is_empty() => {
            warn!("[ClientStart] early data offered without a PSK");
            return Err(Alert::InternalError);
        }
        None => {}
    }

    let message =
        HandshakeMessage::from_body(HandshakeBody::ClientHello(ch)).map_err(internal)?;
    if ctx.offered_psk.is_some() {
        ctx.key_schedule
            .early_update_with_client_hello(message.encoded())
            .map_err(internal)?;
    }
    ctx.client_hello = Some(message.clone());

    debug!("[ClientStart] -> [ClientWaitServerHello]");
    Ok((ClientState::WaitServerHello, vec![message]))
}

/// Rebuild the hello after a HelloRetryRequest: fresh key share for the
/// selected group, cookie echoed, binder recomputed over the rebased
/// transcript. The original hello is preserved; the retry goes into its own
/// slot. A second retry is a protocol violation.
fn process_hello_retry_request(
    ctx: &mut ConnectionContext,
    hrr: HelloRetryRequest,
    message: HandshakeMessage,
) -> Result<(ClientState, Vec<HandshakeMessage>), Alert> {
    if ctx.hello_retry_request.is_some() {
        return Err(Alert::UnexpectedMessage);
    }
    let original = ctx.client_hello.clone().ok_or(Alert::InternalError)?;
    let HandshakeBody::ClientHello(original_ch) = original.body() else {
        return Err(Alert::InternalError);
    };
    let mut retry = original_ch.clone();

    if let Some(group) = hrr.selected_group {
        if !ctx.caps.groups.contains(&group) {
            debug!("[ClientWaitServerHello] retry requests an unsupported group");
            return Err(Alert::IllegalParameter);
        }
        let kx = KeyExchange::generate(group).map_err(internal)?;
        retry.key_shares = vec![KeyShareEntry {
            group,
            key_exchange: kx.public_key_bytes().to_vec(),
        }];
        for (_, mut private_key) in ctx.offered_dh.drain() {
            private_key.zeroize();
        }
        ctx.offered_dh.insert(group, kx.into_private_key_bytes());
    }
    retry.cookie = hrr.cookie.clone();
    // 0-RTT does not survive a retry
    retry.early_data = false;

    ctx.hello_retry_request = Some(message);

    if ctx.offered_psk.is_some() {
        let hash_len = ctx
            .key_schedule
            .params()
            .map(|p| p.hash_len)
            .ok_or(Alert::InternalError)?;
        if let Some(offer) = retry.pre_shared_key.as_mut() {
            offer.binders = vec![vec![0u8; hash_len]];
        }
        let truncated = retry.encode_truncated().map_err(internal)?;
        let mut transcript = ctx
            .key_schedule
            .message_hash_of(original.encoded())
            .map_err(internal)?;
        if let Some(hrr_msg) = &ctx.hello_retry_request {
            transcript.extend_from_slice(hrr_msg.encoded());
        }
        transcript.extend_from_slice(&truncated);
        let binder = ctx.key_schedule.compute_binder(&transcript).map_err(internal)?;
        if let Some(offer) = retry.pre_shared_key.as_mut() {
            offer.binders[0] = binder;
        }
    }

    let retry_message =
        HandshakeMessage::from_body(HandshakeBody::ClientHello(retry)).map_err(internal)?;
    ctx.retry_client_hello = Some(retry_message.clone());

    debug!("[ClientWaitServerHello] retrying after HelloRetryRequest");
    Ok((ClientState::WaitServerHello, vec![retry_message]))
}

fn process_server_hello(
    ctx: &mut ConnectionContext,
    sh: ServerHello,
    message: HandshakeMessage,
) -> Result<(ClientState, Vec<HandshakeMessage>), Alert> {
    if sh.version != TLS13_VERSION {
        debug!("[ClientWaitServerHello] unsupported version {:04x}", sh.version);
        return Err(Alert::ProtocolVersion);
    }

    match sh.pre_shared_key {
        Some(0) if ctx.offered_psk.is_some() => {
            ctx.params.using_psk = true;
            ctx.psk_secret = ctx.offered_psk.as_ref().map(|psk| psk.key.clone());
        }
        _ => {
            // The server declined our PSK (or selected nonsense): restart
            // the schedule without it.
            ctx.params.using_psk = false;
            ctx.key_schedule = KeySchedule::new();
        }
    }

    let mut dh_secret: Option<Vec<u8>> = None;
    if let Some(share) = &sh.key_share {
        let Some(private_key) = ctx.offered_dh.get(&share.group) else {
            debug!("[ClientWaitServerHello] key share for a group we did not offer");
            return Err(Alert::IllegalParameter);
        };
        let secret =
            key_agreement(share.group, &share.key_exchange, private_key).map_err(|e| {
                debug!("[ClientWaitServerHello] key agreement failed: {e}");
                Alert::IllegalParameter
            })?;
        ctx.params.using_dh = true;
        dh_secret = Some(secret);
    }

    if !ctx.params.using_psk && !ctx.params.using_dh {
        debug!("[ClientWaitServerHello] neither PSK nor DH established");
        return Err(Alert::HandshakeFailure);
    }

    ctx.params.cipher_suite = Some(sh.cipher_suite);
    let sh_bytes = message.encoded().to_vec();
    ctx.server_hello = Some(message);

    let (ch_bytes, hrr_bytes, retry_bytes) = {
        let (ch, hrr, retry) = ctx.hello_transcript().ok_or(Alert::InternalError)?;
        (
            ch.encoded().to_vec(),
            hrr.map(|m| m.encoded().to_vec()),
            retry.map(|m| m.encoded().to_vec()),
        )
    };
    ctx.key_schedule
        .init(sh.cipher_suite, &ch_bytes, hrr_bytes.as_deref(), retry_bytes.as_deref())
        .map_err(|err| match err {
            TlsError::HandshakeFailed(_) => Alert::IllegalParameter,
            other => internal(other),
        })?;
    ctx.key_schedule
        .update_with_server_hello(&sh_bytes, dh_secret.as_deref())
        .map_err(internal)?;
    if let Some(mut secret) = dh_secret {
        secret.zeroize();
    }

    debug!("[ClientWaitServerHello] -> [ClientWaitEncryptedExtensions]");
    Ok((ClientState::WaitEncryptedExtensions, Vec::new()))
}

fn process_encrypted_extensions(
    ctx: &mut ConnectionContext,
    ee: EncryptedExtensions,
    message: HandshakeMessage,
) -> Result<(ClientState, Vec<HandshakeMessage>), Alert> {
    if let Some(proto) = ee.alpn_protocols.first() {
        ctx.params.next_proto = Some(proto.clone());
    }
    // Acceptance only counts if we actually offered 0-RTT.
    ctx.params.using_early_data =
        ee.early_data && ctx.params.using_psk && !ctx.opts.early_data.is_empty();

    ctx.server_first_flight = vec![message];

    if ctx.params.using_psk {
        debug!("[ClientWaitEncryptedExtensions] -> [ClientWaitFinished]");
        Ok((ClientState::WaitFinished, Vec::new()))
    } else {
        debug!("[ClientWaitEncryptedExtensions] -> [ClientWaitCertOrCertRequest]");
        Ok((ClientState::WaitCertOrCertRequest, Vec::new()))
    }
}

fn process_certificate_verify(
    ctx: &mut ConnectionContext,
    cv: CertificateVerify,
    message: HandshakeMessage,
) -> Result<(ClientState, Vec<HandshakeMessage>), Alert> {
    let certificate = ctx.server_certificate.as_ref().ok_or(Alert::InternalError)?;
    let Some(leaf) = certificate.chain.first() else {
        return Err(Alert::BadCertificate);
    };
    let alg = ctx.key_schedule.hash_algorithm().ok_or(Alert::InternalError)?;

    let mut messages = ctx.hello_messages();
    messages.extend(ctx.server_first_flight.iter());
    let hash = handshake_transcript_hash(alg, &messages);

    if verify_certificate_verify(&leaf.public_key, cv.scheme, &cv.signature, &hash, true)
        .is_err()
    {
        debug!("[ClientWaitCertificateVerify] signature verification failed");
        return Err(Alert::HandshakeFailure);
    }

    match &ctx.auth_certificate {
        Some(hook) => {
            if hook(&certificate.chain).is_err() {
                debug!("[ClientWaitCertificateVerify] application rejected the chain");
                return Err(Alert::BadCertificate);
            }
        }
        None => {
            warn!("[ClientWaitCertificateVerify] no certificate verifier configured; chain unchecked");
        }
    }

    ctx.server_first_flight.push(message);
    debug!("[ClientWaitCertificateVerify] -> [ClientWaitFinished]");
    Ok((ClientState::WaitFinished, Vec::new()))
}

/// Verify the server Finished, then assemble and hash the second flight:
/// EndOfEarlyData when 0-RTT was accepted, Certificate (and
/// CertificateVerify for a non-empty chain) when client auth was requested,
/// and our own Finished.
fn process_server_finished(
    ctx: &mut ConnectionContext,
    fin: Finished,
    message: HandshakeMessage,
) -> Result<(ClientState, Vec<HandshakeMessage>), Alert> {
    let flight_bytes: Vec<&[u8]> =
        ctx.server_first_flight.iter().map(|m| m.encoded()).collect();
    let expected = ctx
        .key_schedule
        .update_with_server_first_flight(&flight_bytes)
        .map_err(internal)?;
    drop(flight_bytes);
    if !bool::from(expected.ct_eq(&fin.verify_data)) {
        debug!("[ClientWaitFinished] server Finished failed to verify");
        return Err(Alert::HandshakeFailure);
    }
    ctx.server_finished = Some(message);

    let mut second_flight: Vec<HandshakeMessage> = Vec::new();
    if ctx.params.using_early_data {
        second_flight
            .push(HandshakeMessage::from_body(HandshakeBody::EndOfEarlyData).map_err(internal)?);
    }

    if ctx.params.using_client_auth {
        let schemes = ctx
            .server_certificate_request
            .as_ref()
            .map(|cr| cr.signature_schemes.clone())
            .unwrap_or_default();
        match certificate_selection(None, &schemes, &ctx.caps.certificates) {
            Ok((certificate, scheme)) => {
                let cert_body = CertificateMsg {
                    context: Vec::new(),
                    chain: certificate.chain.clone(),
                };
                ctx.client_certificate = Some(cert_body.clone());
                second_flight.push(
                    HandshakeMessage::from_body(HandshakeBody::Certificate(cert_body))
                        .map_err(internal)?,
                );

                let alg = ctx.key_schedule.hash_algorithm().ok_or(Alert::InternalError)?;
                let mut messages = ctx.hello_messages();
                messages.extend(ctx.server_first_flight.iter());
                if let Some(server_fin) = &ctx.server_finished {
                    messages.push(server_fin);
                }
                messages.extend(second_flight.iter());
                let hash = handshake_transcript_hash(alg, &messages);
                let signature =
                    sign_certificate_verify(&certificate.private_key, scheme, &hash, false)
                        .map_err(internal)?;
                second_flight.push(
                    HandshakeMessage::from_body(HandshakeBody::CertificateVerify(
                        CertificateVerify { scheme, signature },
                    ))
                    .map_err(internal)?,
                );
            }
            Err(_) => {
                debug!("[ClientWaitFinished] no certificate satisfies the request; declining");
                second_flight.push(
                    HandshakeMessage::from_body(HandshakeBody::Certificate(
                        CertificateMsg::default(),
                    ))
                    .map_err(internal)?,
                );
            }
        }
    }

    let second_bytes: Vec<&[u8]> = second_flight.iter().map(|m| m.encoded()).collect();
    let verify_data = ctx
        .key_schedule
        .update_with_client_second_flight(&second_bytes)
        .map_err(internal)?;
    drop(second_bytes);

    let finished =
        HandshakeMessage::from_body(HandshakeBody::Finished(Finished { verify_data }))
            .map_err(internal)?;
    ctx.client_second_flight = second_flight.clone();

    let mut to_send = second_flight;
    to_send.push(finished);

    debug!("[ClientWaitFinished] -> [Connected]");
    Ok((ClientState::Connected, to_send))
}
