//! ICE candidate wire-text parsing
//!
//! Candidates travel through the signaling store as SDP attribute text
//! (`candidate:<foundation> <component> <transport> <priority> <address>
//! <port> typ <type> ...`). Malformed text is rejected with an error; the
//! call manager logs and drops it rather than aborting the call.

use std::fmt;

use crate::{Error, Result};

/// A parsed ICE candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub foundation: String,
    pub component: u32,
    pub transport: String,
    pub priority: u64,
    pub address: String,
    pub port: u16,
    /// Candidate type: host, srflx, prflx, or relay
    pub kind: String,
    /// Related address, present on reflexive/relay candidates
    pub raddr: Option<String>,
    /// Related port
    pub rport: Option<u16>,
}

impl IceCandidate {
    /// Parse candidate wire text; `a=candidate:` and `candidate:` prefixes
    /// are accepted.
    ///
    /// # Errors
    ///
    /// Returns a protocol error for text that does not follow the
    /// candidate grammar.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text
            .trim()
            .trim_start_matches("a=")
            .trim_start_matches("candidate:");

        let tokens: Vec<&str> = body.split_whitespace().collect();
        if tokens.len() < 8 {
            return Err(Error::Protocol(format!("candidate too short: {text}")));
        }
        if tokens[6] != "typ" {
            return Err(Error::Protocol(format!(
                "candidate missing typ marker: {text}"
            )));
        }

        let component = tokens[1]
            .parse()
            .map_err(|_| Error::Protocol(format!("bad component: {}", tokens[1])))?;
        let priority = tokens[3]
            .parse()
            .map_err(|_| Error::Protocol(format!("bad priority: {}", tokens[3])))?;
        let port = tokens[5]
            .parse()
            .map_err(|_| Error::Protocol(format!("bad port: {}", tokens[5])))?;

        let mut candidate = Self {
            foundation: tokens[0].to_string(),
            component,
            transport: tokens[2].to_uppercase(),
            priority,
            address: tokens[4].to_string(),
            port,
            kind: tokens[7].to_string(),
            raddr: None,
            rport: None,
        };

        // trailing extension pairs; unknown ones are ignored
        let mut rest = tokens[8..].chunks_exact(2);
        for pair in &mut rest {
            match pair[0] {
                "raddr" => candidate.raddr = Some(pair[1].to_string()),
                "rport" => {
                    candidate.rport = Some(pair[1].parse().map_err(|_| {
                        Error::Protocol(format!("bad rport: {}", pair[1]))
                    })?);
                }
                _ => {}
            }
        }

        Ok(candidate)
    }
}

impl fmt::Display for IceCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "candidate:{} {} {} {} {} {} typ {}",
            self.foundation,
            self.component,
            self.transport,
            self.priority,
            self.address,
            self.port,
            self.kind
        )?;
        if let Some(raddr) = &self.raddr {
            write!(f, " raddr {raddr}")?;
        }
        if let Some(rport) = self.rport {
            write!(f, " rport {rport}")?;
        }
        Ok(())
    }
}
