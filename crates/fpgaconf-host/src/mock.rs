//! Scripted transport for unit tests

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use fpgaconf_core::protocol::{Command, Request};

use crate::error::TransportError;
use crate::transport::Transport;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    In {
        request: u8,
        value: u16,
        index: u16,
        length: u16,
    },
    Out {
        request: u8,
        value: u16,
        index: u16,
        data: Vec<u8>,
        timeout: Duration,
    },
    Bulk {
        endpoint: u8,
        len: usize,
    },
    Claim(u8),
    Release(u8),
}

/// Answers are consumed in order per code; unscripted requests stall and
/// unscripted commands and bulk writes succeed in full.
#[derive(Default)]
pub struct MockTransport {
    pub calls: Vec<Call>,
    pub answers: HashMap<u8, VecDeque<Result<Vec<u8>, TransportError>>>,
    pub accepts: HashMap<u8, VecDeque<Result<usize, TransportError>>>,
    pub bulk: VecDeque<Result<usize, TransportError>>,
    pub claim_fails: bool,
}

impl MockTransport {
    pub fn answer(&mut self, request: Request, r: Result<Vec<u8>, TransportError>) {
        self.answers.entry(request.code()).or_default().push_back(r);
    }

    pub fn accept(&mut self, command: Command, r: Result<usize, TransportError>) {
        self.accepts.entry(command.code()).or_default().push_back(r);
    }

    pub fn out_calls(&self, command: Command) -> Vec<&Call> {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Out { request, .. } if *request == command.code()))
            .collect()
    }
}

impl Transport for MockTransport {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
        _: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.calls.push(Call::In {
            request,
            value,
            index,
            length,
        });
        self.answers
            .get_mut(&request)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Err(TransportError::Stall))
            .map(|mut v| {
                v.truncate(length as usize);
                v
            })
    }

    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.calls.push(Call::Out {
            request,
            value,
            index,
            data: data.to_vec(),
            timeout,
        });
        self.accepts
            .get_mut(&request)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok(data.len()))
    }

    fn bulk_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        _: Duration,
    ) -> Result<usize, TransportError> {
        self.calls.push(Call::Bulk {
            endpoint,
            len: data.len(),
        });
        self.bulk.pop_front().unwrap_or(Ok(data.len()))
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.calls.push(Call::Claim(interface));
        if self.claim_fails {
            return Err(TransportError::Other("busy".into()));
        }
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) {
        self.calls.push(Call::Release(interface));
    }
}
