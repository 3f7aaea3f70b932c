//! TLS 1.3 server handshake automaton.
//!
//! ```text
//! Start --ClientHello--> Start (HelloRetryRequest, cookie round)
//! Start --ClientHello--> Negotiated (self-chained)
//!   Negotiated emits ServerHello..Finished, then
//!     --0-RTT--> WaitEndOfEarlyData --EndOfEarlyData--> WaitFlight2
//!     --else---> WaitFlight2 (self-chained)
//!   WaitFlight2 --> WaitCertificate (client auth) | WaitFinished
//!   WaitCertificate --Certificate--> WaitFinished (empty chain)
//!                                  | WaitCertificateVerify
//!   WaitCertificateVerify --CertificateVerify--> WaitFinished
//!   WaitFinished --Finished--> Connected
//! ```

use super::codec::{
    CertificateMsg, CertificateRequest, CertificateVerify, ClientHello, EncryptedExtensions,
    Finished, HandshakeBody, HandshakeMessage, HelloRetryRequest, KeyShareEntry, ServerHello,
};
use super::connected_next;
use super::context::ConnectionContext;
use super::negotiate::{
    alpn_negotiation, certificate_selection, cipher_suite_negotiation, dh_negotiation,
    early_data_negotiation, psk_mode_negotiation, psk_negotiation, version_supported,
};
use super::signing::sign_certificate_verify;
use super::verify::{handshake_transcript_hash, verify_certificate_verify};
use crate::alert::Alert;
use crate::crypt::key_schedule::KeySchedule;
use crate::TLS13_VERSION;
use log::{debug, warn};
use opal_types::TlsError;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// The server automaton.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Start,
    Negotiated,
    WaitEndOfEarlyData,
    WaitFlight2,
    WaitCertificate,
    WaitCertificateVerify,
    WaitFinished,
    Connected,
}

impl ServerState {
    /// Advance the automaton. `None` input is valid only in the self-driven
    /// states (`Negotiated`, `WaitFlight2`); both are also chained into
    /// internally, so a caller normally only sees them after an alert-free
    /// pause.
    pub fn next(
        self,
        ctx: &mut ConnectionContext,
        input: Option<HandshakeMessage>,
    ) -> Result<(ServerState, Vec<HandshakeMessage>), Alert> {
        match self {
            ServerState::Start => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::ClientHello(ch) => process_client_hello(ctx, ch, message),
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ServerState::Negotiated => match input {
                None => negotiated(ctx),
                Some(_) => Err(Alert::UnexpectedMessage),
            },
            ServerState::WaitEndOfEarlyData => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                if !matches!(message.body(), HandshakeBody::EndOfEarlyData) {
                    return Err(Alert::UnexpectedMessage);
                }
                ctx.client_second_flight.push(message);
                debug!("[ServerWaitEndOfEarlyData] -> [ServerWaitFlight2]");
                wait_flight2(ctx)
            }
            ServerState::WaitFlight2 => match input {
                None => wait_flight2(ctx),
                Some(_) => Err(Alert::UnexpectedMessage),
            },
            ServerState::WaitCertificate => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::Certificate(cert) => {
                        process_client_certificate(ctx, cert, message)
                    }
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ServerState::WaitCertificateVerify => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::CertificateVerify(cv) => {
                        process_client_certificate_verify(ctx, cv, message)
                    }
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ServerState::WaitFinished => {
                let message = input.ok_or(Alert::UnexpectedMessage)?;
                match message.body().clone() {
                    HandshakeBody::Finished(fin) => process_client_finished(ctx, fin),
                    _ => Err(Alert::UnexpectedMessage),
                }
            }
            ServerState::Connected => connected_next(ServerState::Connected, input),
        }
    }
}

fn internal(err: TlsError) -> Alert {
    debug!("internal failure: {err}");
    Alert::InternalError
}

/// Inspect the ClientHello and delegate every sub-decision to a negotiator:
/// version, cookie, DH, PSK (binder verification), mode, certificate, early
/// data, cipher suite, ALPN. Success self-chains into [`negotiated`].
fn process_client_hello(
    ctx: &mut ConnectionContext,
    ch: ClientHello,
    message: HandshakeMessage,
) -> Result<(ServerState, Vec<HandshakeMessage>), Alert> {
    let retrying = ctx.hello_retry_request.is_some();
    if retrying {
        ctx.retry_client_hello = Some(message.clone());
    } else {
        ctx.client_hello = Some(message.clone());
    }
    if let Some(name) = &ch.server_name {
        ctx.params.server_name = Some(name.clone());
    }

    if !version_supported(&ch.supported_versions) {
        debug!("[ServerStart] client does not offer TLS 1.3");
        return Err(Alert::ProtocolVersion);
    }

    if ctx.caps.require_cookie {
        match &ctx.cookie {
            None => {
                let mut cookie = vec![0u8; 32];
                getrandom::getrandom(&mut cookie).map_err(|_| Alert::InternalError)?;
                ctx.cookie = Some(cookie.clone());

                let hrr = HelloRetryRequest {
                    version: TLS13_VERSION,
                    selected_group: None,
                    cookie: Some(cookie),
                };
                let hrr_message =
                    HandshakeMessage::from_body(HandshakeBody::HelloRetryRequest(hrr))
                        .map_err(internal)?;
                ctx.hello_retry_request = Some(hrr_message.clone());

                debug!("[ServerStart] issuing cookie via HelloRetryRequest");
                return Ok((ServerState::Start, vec![hrr_message]));
            }
            Some(expected) => {
                let presented = ch.cookie.as_deref().unwrap_or(&[]);
                if !bool::from(presented.ct_eq(expected.as_slice())) {
                    debug!("[ServerStart] cookie mismatch");
                    return Err(Alert::AccessDenied);
                }
            }
        }
    }

    let dh = dh_negotiation(&ch.key_shares, &ctx.caps.groups).map_err(internal)?;
    let can_do_dh = dh.is_some();

    let mut psk_result = None;
    if let Some(offer) = &ch.pre_shared_key {
        let truncated = ch.encode_truncated().map_err(|_| Alert::DecodeError)?;
        let prior = if retrying {
            ctx.client_hello.as_ref().zip(ctx.hello_retry_request.as_ref())
        } else {
            None
        };
        psk_result = psk_negotiation(
            &offer.identities,
            &offer.binders,
            prior,
            &truncated,
            &ctx.caps.psks,
        )
        .map_err(|err| match err {
            TlsError::HandshakeFailed(_) => Alert::DecodeError,
            other => internal(other),
        })?;
    }
    let can_do_psk = psk_result.is_some();

    let (using_dh, using_psk) = psk_mode_negotiation(can_do_dh, can_do_psk, &ch.psk_modes);
    ctx.params.using_dh = using_dh;
    ctx.params.using_psk = using_psk;
    if !using_dh && !using_psk {
        debug!("[ServerStart] neither DH nor PSK negotiated");
        return Err(Alert::HandshakeFailure);
    }

    let mut psk = None;
    if using_psk {
        if let Some(result) = psk_result {
            ctx.key_schedule = result.key_schedule;
            ctx.selected_psk_index = Some(result.index);
            ctx.psk_secret = Some(result.psk.key.clone());
            psk = Some(result.psk);
        }
    } else {
        ctx.key_schedule = KeySchedule::new();

        // The certificate path needs these extensions to pick a credential.
        if ch.server_name.is_none()
            || ch.supported_groups.is_empty()
            || ch.signature_schemes.is_empty()
        {
            debug!("[ServerStart] missing server_name/supported_groups/signature_algorithms");
            return Err(Alert::MissingExtension);
        }
        let (certificate, scheme) = certificate_selection(
            ch.server_name.as_deref(),
            &ch.signature_schemes,
            &ctx.caps.certificates,
        )
        .map_err(|_| {
            debug!("[ServerStart] no appropriate certificate found");
            Alert::AccessDenied
        })?;
        ctx.cert = Some(certificate);
        ctx.cert_scheme = Some(scheme);
    }

    if using_dh {
        if let Some(dh) = &dh {
            ctx.dh_group = Some(dh.group);
            ctx.dh_public = Some(dh.public_key.clone());
            ctx.dh_secret = Some(dh.shared_secret.clone());
        }
    }

    ctx.params.using_early_data =
        early_data_negotiation(using_psk, ch.early_data, ctx.caps.allow_early_data);
    if ctx.params.using_early_data {
        ctx.key_schedule
            .early_update_with_client_hello(message.encoded())
            .map_err(internal)?;
    }

    let suite =
        cipher_suite_negotiation(psk.as_ref(), &ch.cipher_suites, &ctx.caps.cipher_suites)
            .map_err(|_| {
                debug!("[ServerStart] no common cipher suite");
                Alert::HandshakeFailure
            })?;
    ctx.params.cipher_suite = Some(suite);

    ctx.params.next_proto =
        alpn_negotiation(psk.as_ref(), &ch.alpn_protocols, &ctx.caps.next_protos).map_err(
            |_| {
                debug!("[ServerStart] no common application protocol");
                Alert::NoApplicationProtocol
            },
        )?;

    debug!("[ServerStart] -> [ServerNegotiated]");
    negotiated(ctx)
}

/// Assemble the server's first flight: ServerHello, EncryptedExtensions,
/// CertificateRequest / Certificate / CertificateVerify on the certificate
/// path, and Finished, advancing the key schedule at each boundary.
fn negotiated(
    ctx: &mut ConnectionContext,
) -> Result<(ServerState, Vec<HandshakeMessage>), Alert> {
    let suite = ctx.params.cipher_suite.ok_or(Alert::InternalError)?;

    let mut random = [0u8; 32];
    getrandom::getrandom(&mut random).map_err(|_| Alert::InternalError)?;

    let key_share = if ctx.params.using_dh {
        Some(KeyShareEntry {
            group: ctx.dh_group.ok_or(Alert::InternalError)?,
            key_exchange: ctx.dh_public.clone().ok_or(Alert::InternalError)?,
        })
    } else {
        None
    };
    let pre_shared_key = if ctx.params.using_psk {
        Some(ctx.selected_psk_index.ok_or(Alert::InternalError)? as u16)
    } else {
        None
    };

    let sh = ServerHello {
        version: TLS13_VERSION,
        random,
        cipher_suite: suite,
        key_share,
        pre_shared_key,
    };
    let sh_message =
        HandshakeMessage::from_body(HandshakeBody::ServerHello(sh)).map_err(internal)?;
    ctx.server_hello = Some(sh_message.clone());

    let (ch_bytes, hrr_bytes, retry_bytes) = {
        let (ch, hrr, retry) = ctx.hello_transcript().ok_or(Alert::InternalError)?;
        (
            ch.encoded().to_vec(),
            hrr.map(|m| m.encoded().to_vec()),
            retry.map(|m| m.encoded().to_vec()),
        )
    };
    ctx.key_schedule
        .init(suite, &ch_bytes, hrr_bytes.as_deref(), retry_bytes.as_deref())
        .map_err(internal)?;
    ctx.key_schedule
        .update_with_server_hello(sh_message.encoded(), ctx.dh_secret.as_deref())
        .map_err(internal)?;
    if let Some(mut secret) = ctx.dh_secret.take() {
        secret.zeroize();
    }

    let mut flight: Vec<HandshakeMessage> = Vec::new();
    let ee = EncryptedExtensions {
        alpn_protocols: ctx.params.next_proto.iter().cloned().collect(),
        early_data: ctx.params.using_early_data,
    };
    flight.push(
        HandshakeMessage::from_body(HandshakeBody::EncryptedExtensions(ee)).map_err(internal)?,
    );

    if !ctx.params.using_psk {
        if ctx.caps.require_client_auth {
            ctx.params.using_client_auth = true;
            let cr = CertificateRequest {
                signature_schemes: ctx.caps.signature_schemes.clone(),
            };
            ctx.server_certificate_request = Some(cr.clone());
            flight.push(
                HandshakeMessage::from_body(HandshakeBody::CertificateRequest(cr))
                    .map_err(internal)?,
            );
        }

        let certificate = ctx.cert.clone().ok_or(Alert::InternalError)?;
        let scheme = ctx.cert_scheme.ok_or(Alert::InternalError)?;
        let cert_body = CertificateMsg {
            context: Vec::new(),
            chain: certificate.chain.clone(),
        };
        ctx.server_certificate = Some(cert_body.clone());
        flight.push(
            HandshakeMessage::from_body(HandshakeBody::Certificate(cert_body))
                .map_err(internal)?,
        );

        let alg = ctx.key_schedule.hash_algorithm().ok_or(Alert::InternalError)?;
        let mut messages = ctx.hello_messages();
        messages.extend(flight.iter());
        let hash = handshake_transcript_hash(alg, &messages);
        let signature = sign_certificate_verify(&certificate.private_key, scheme, &hash, true)
            .map_err(internal)?;
        flight.push(
            HandshakeMessage::from_body(HandshakeBody::CertificateVerify(CertificateVerify {
                scheme,
                signature,
            }))
            .map_err(internal)?,
        );
    }

    let flight_bytes: Vec<&[u8]> = flight.iter().map(|m| m.encoded()).collect();
    let verify_data = ctx
        .key_schedule
        .update_with_server_first_flight(&flight_bytes)
        .map_err(internal)?;
    drop(flight_bytes);
    let finished =
        HandshakeMessage::from_body(HandshakeBody::Finished(Finished { verify_data }))
            .map_err(internal)?;
    ctx.server_first_flight = flight.clone();
    ctx.server_finished = Some(finished.clone());

    let mut to_send = vec![sh_message];
    to_send.extend(flight);
    to_send.push(finished);

    if ctx.params.using_early_data {
        debug!("[ServerNegotiated] -> [ServerWaitEndOfEarlyData]");
        return Ok((ServerState::WaitEndOfEarlyData, to_send));
    }

    debug!("[ServerNegotiated] -> [ServerWaitFlight2]");
    let (state, more) = wait_flight2(ctx)?;
    to_send.extend(more);
    Ok((state, to_send))
}

/// Route to client authentication or straight to the Finished wait. The
/// second-flight buffer already holds EndOfEarlyData when 0-RTT ended, so
/// it is left as is.
fn wait_flight2(
    ctx: &mut ConnectionContext,
) -> Result<(ServerState, Vec<HandshakeMessage>), Alert> {
    if ctx.params.using_client_auth {
        debug!("[ServerWaitFlight2] -> [ServerWaitCertificate]");
        Ok((ServerState::WaitCertificate, Vec::new()))
    } else {
        debug!("[ServerWaitFlight2] -> [ServerWaitFinished]");
        Ok((ServerState::WaitFinished, Vec::new()))
    }
}

fn process_client_certificate(
    ctx: &mut ConnectionContext,
    cert: CertificateMsg,
    message: HandshakeMessage,
) -> Result<(ServerState, Vec<HandshakeMessage>), Alert> {
    ctx.client_second_flight.push(message);

    if cert.chain.is_empty() {
        debug!("[ServerWaitCertificate] client declined authentication");
        return Ok((ServerState::WaitFinished, Vec::new()));
    }

    ctx.client_certificate = Some(cert);
    debug!("[ServerWaitCertificate] -> [ServerWaitCertificateVerify]");
    Ok((ServerState::WaitCertificateVerify, Vec::new()))
}

fn process_client_certificate_verify(
    ctx: &mut ConnectionContext,
    cv: CertificateVerify,
    message: HandshakeMessage,
) -> Result<(ServerState, Vec<HandshakeMessage>), Alert> {
    let certificate = ctx.client_certificate.as_ref().ok_or(Alert::InternalError)?;
    let Some(leaf) = certificate.chain.first() else {
        return Err(Alert::BadCertificate);
    };
    let alg = ctx.key_schedule.hash_algorithm().ok_or(Alert::InternalError)?;

    let mut messages = ctx.hello_messages();
    messages.extend(ctx.server_first_flight.iter());
    if let Some(server_fin) = &ctx.server_finished {
        messages.push(server_fin);
    }
    messages.extend(ctx.client_second_flight.iter());
    let hash = handshake_transcript_hash(alg, &messages);

    if verify_certificate_verify(&leaf.public_key, cv.scheme, &cv.signature, &hash, false)
        .is_err()
    {
        debug!("[ServerWaitCertificateVerify] client signature failed to verify");
        return Err(Alert::HandshakeFailure);
    }

    match &ctx.auth_certificate {
        Some(hook) => {
            if hook(&certificate.chain).is_err() {
                debug!("[ServerWaitCertificateVerify] application rejected the chain");
                return Err(Alert::BadCertificate);
            }
        }
        None => {
            warn!("[ServerWaitCertificateVerify] no certificate verifier configured; chain unchecked");
        }
    }

    ctx.client_second_flight.push(message);
    debug!("[ServerWaitCertificateVerify] -> [ServerWaitFinished]");
    Ok((ServerState::WaitFinished, Vec::new()))
}

fn process_client_finished(
    ctx: &mut ConnectionContext,
    fin: Finished,
) -> Result<(ServerState, Vec<HandshakeMessage>), Alert> {
    let flight_bytes: Vec<&[u8]> =
        ctx.client_second_flight.iter().map(|m| m.encoded()).collect();
    let expected = ctx
        .key_schedule
        .update_with_client_second_flight(&flight_bytes)
        .map_err(internal)?;
    drop(flight_bytes);

    if !bool::from(expected.ct_eq(&fin.verify_data)) {
        debug!("[ServerWaitFinished] client Finished failed to verify");
        return Err(Alert::HandshakeFailure);
    }

    debug!("[ServerWaitFinished] -> [Connected]");
    Ok((ServerState::Connected, Vec::new()))
}
