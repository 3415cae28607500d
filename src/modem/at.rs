//! AT-command modem driver
//!
//! Talks to a GSM modem in PDU mode over any async byte stream: a serial
//! port, a `tcp://` serial bridge, or an in-memory pipe in tests.
//! Commands are serialized through one lock so a send never interleaves with
//! a poll.

use super::pdu::{decode_stored, StoredPdu};
use super::{
    Modem, ModemError, NetworkInfo, SignalQuality, SmsCapacity, SmsMessage, SmsState, SmsSubmit,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};
use tracing::{debug, info, warn};

/// Echo off, numeric error codes, PDU mode
const INIT_COMMANDS: [&str; 3] = ["ATE0", "AT+CMEE=1", "AT+CMGF=0"];

const CTRL_Z: u8 = 0x1A;
const ESC: u8 = 0x1B;

/// Network submission takes far longer than a local query
const SEND_TIMEOUT_FACTOR: u32 = 6;

static CSQ: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+CSQ:\s*(\d+)\s*,\s*(\d+)").unwrap());
static CREG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\+CREG:\s*\d+\s*,\s*(\d+)(?:\s*,\s*"?([0-9A-Fa-f]+)"?\s*,\s*"?([0-9A-Fa-f]+)"?)?"#)
        .unwrap()
});
static COPS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\+COPS:\s*\d+(?:\s*,\s*(\d)\s*,\s*"([^"]*)")?"#).unwrap());
static CPMS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\+CPMS:\s*"?[A-Z]*"?\s*,\s*(\d+)\s*,\s*(\d+)"#).unwrap());
static CMGL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+CMGL:\s*(\d+)\s*,\s*(\d+)\s*,[^,]*,\s*\d+").unwrap());
static CMGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+CMGS:\s*(\d+)").unwrap());

type Reader = BufReader<Box<dyn AsyncRead + Unpin + Send>>;
type Writer = Box<dyn AsyncWrite + Unpin + Send>;

/// GSM modem driven through AT commands
pub struct AtModem {
    port: Mutex<AtPort>,
    timeout: Duration,
}

struct AtPort {
    reader: Reader,
    writer: Writer,
    initialized: bool,
    /// Set after a timeout; late replies are discarded before the next command
    needs_resync: bool,
}

impl AtModem {
    /// Open a serial port or a `tcp://host:port` serial bridge
    ///
    /// Serial ports are put in raw 8N1 mode without flow control, so the
    /// unterminated `> ` prompt reaches the driver as soon as it is sent.
    pub async fn open(device: &str, baud_rate: u32, timeout: Duration) -> Result<Self, ModemError> {
        let modem = if let Some(address) = device.strip_prefix("tcp://") {
            let (reader, writer) = TcpStream::connect(address).await?.into_split();
            Self::new(Box::new(reader), Box::new(writer), timeout)
        } else {
            Self::from_stream(open_serial(device, baud_rate)?, timeout)
        };

        info!(device = %device, baud_rate, "Opened modem device");
        Ok(modem)
    }

    /// Drive a modem over one bidirectional stream
    pub fn from_stream<S>(stream: S, timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(Box::new(reader), Box::new(writer), timeout)
    }

    pub fn new(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        writer: Box<dyn AsyncWrite + Unpin + Send>,
        timeout: Duration,
    ) -> Self {
        Self {
            port: Mutex::new(AtPort {
                reader: BufReader::new(reader),
                writer,
                initialized: false,
                needs_resync: false,
            }),
            timeout,
        }
    }

    /// Run one command and return its information lines
    async fn query(&self, command: &str) -> Result<Vec<String>, ModemError> {
        let mut port = self.port.lock().await;
        port.prepare(self.timeout).await?;
        port.execute(command, self.timeout).await
    }

    /// Identity queries answer with one bare line, sometimes prefixed
    async fn identity(&self, command: &str) -> Result<String, ModemError> {
        let lines = self.query(command).await?;
        lines
            .iter()
            .map(|line| strip_info_prefix(line))
            .find(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ModemError::Protocol(format!("empty response to {command}")))
    }

    async fn operator(&self, format: u8) -> Result<Option<String>, ModemError> {
        let mut port = self.port.lock().await;
        port.prepare(self.timeout).await?;
        port.execute(&format!("AT+COPS=3,{format}"), self.timeout).await?;
        let lines = port.execute("AT+COPS?", self.timeout).await?;
        let captures = lines
            .iter()
            .find_map(|line| COPS.captures(line))
            .ok_or_else(|| ModemError::Protocol("missing +COPS response".to_string()))?;
        Ok(captures.get(2).map(|name| name.as_str().to_string()))
    }
}

impl AtPort {
    async fn prepare(&mut self, timeout: Duration) -> Result<(), ModemError> {
        if self.needs_resync {
            self.drain().await;
            self.needs_resync = false;
        }
        if !self.initialized {
            for command in INIT_COMMANDS {
                self.execute(command, timeout).await?;
            }
            self.initialized = true;
            info!("Modem initialized in PDU mode");
        }
        Ok(())
    }

    async fn drain(&mut self) {
        let mut discarded = Vec::new();
        while let Ok(Ok(read)) = tokio::time::timeout(
            Duration::from_millis(100),
            self.reader.read_until(b'\n', &mut discarded),
        )
        .await
        {
            if read == 0 {
                break;
            }
        }
        if !discarded.is_empty() {
            debug!(
                discarded = %String::from_utf8_lossy(&discarded).trim(),
                "Discarded late modem output"
            );
        }
    }

    async fn execute(&mut self, command: &str, timeout: Duration) -> Result<Vec<String>, ModemError> {
        debug!(command, "AT command");
        let exchange = async {
            self.write_command(command.as_bytes(), b'\r').await?;
            self.read_response(command).await
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                self.mark_timed_out();
                Err(ModemError::Timeout(timeout))
            }
        }
    }

    async fn submit(&mut self, part: &SmsSubmit, timeout: Duration) -> Result<u8, ModemError> {
        let pdu = part.to_pdu();
        let command = format!("AT+CMGS={}", pdu.tpdu_length);
        debug!(command = %command, pdu = %pdu.hex, "Submitting SMS PDU");

        let exchange = async {
            self.write_command(command.as_bytes(), b'\r').await?;
            self.wait_for_prompt().await?;
            self.write_command(pdu.hex.as_bytes(), CTRL_Z).await?;
            let lines = self.read_response(&pdu.hex).await?;
            lines
                .iter()
                .find_map(|line| CMGS.captures(line))
                .and_then(|captures| captures[1].parse::<u8>().ok())
                .ok_or_else(|| ModemError::Protocol("missing +CMGS reference".to_string()))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                // abort the pending PDU input
                if let Err(e) = self.writer.write_all(&[ESC]).await {
                    warn!(error = %e, "Failed to abort pending SMS input");
                }
                self.mark_timed_out();
                Err(ModemError::Timeout(timeout))
            }
        }
    }

    /// A silent modem may have reset, so initialize again on the next command
    fn mark_timed_out(&mut self) {
        self.needs_resync = true;
        self.initialized = false;
    }

    async fn write_command(&mut self, body: &[u8], terminator: u8) -> Result<(), ModemError> {
        self.writer.write_all(body).await?;
        self.writer.write_all(&[terminator]).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String, ModemError> {
        let mut buffer = Vec::new();
        let read = self.reader.read_until(b'\n', &mut buffer).await?;
        if read == 0 {
            return Err(ModemError::Disconnected);
        }
        Ok(String::from_utf8_lossy(&buffer).trim().to_string())
    }

    /// Collect information lines until the final result code
    async fn read_response(&mut self, echo: &str) -> Result<Vec<String>, ModemError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            if line.is_empty() || line == echo {
                continue;
            }
            match final_result(&line) {
                Some(Ok(())) => return Ok(lines),
                Some(Err(e)) => return Err(e),
                None => lines.push(line),
            }
        }
    }

    /// The `> ` prompt is not line terminated, so read byte by byte
    async fn wait_for_prompt(&mut self) -> Result<(), ModemError> {
        let mut line = Vec::new();
        loop {
            let byte = match self.reader.read_u8().await {
                Ok(byte) => byte,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(ModemError::Disconnected)
                }
                Err(e) => return Err(e.into()),
            };

            match byte {
                b'>' if line.iter().all(u8::is_ascii_whitespace) => return Ok(()),
                b'\n' => {
                    let text = String::from_utf8_lossy(&line).trim().to_string();
                    match final_result(&text) {
                        Some(Err(e)) => return Err(e),
                        Some(Ok(())) => {
                            return Err(ModemError::Protocol(
                                "OK received instead of SMS prompt".to_string(),
                            ))
                        }
                        None => line.clear(),
                    }
                }
                _ => line.push(byte),
            }
        }
    }
}

fn open_serial(device: &str, baud_rate: u32) -> Result<SerialStream, ModemError> {
    tokio_serial::new(device, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| ModemError::Io(format!("{device}: {e}")))
}

fn final_result(line: &str) -> Option<Result<(), ModemError>> {
    match line {
        "OK" => Some(Ok(())),
        "ERROR" => Some(Err(ModemError::Rejected)),
        _ => {
            if let Some(code) = line.strip_prefix("+CME ERROR:") {
                Some(Err(parse_error_code(code, line, ModemError::Equipment)))
            } else {
                line.strip_prefix("+CMS ERROR:")
                    .map(|code| Err(parse_error_code(code, line, ModemError::Message)))
            }
        }
    }
}

fn parse_error_code(code: &str, line: &str, numeric: fn(u16) -> ModemError) -> ModemError {
    code.trim()
        .parse()
        .map(numeric)
        .unwrap_or_else(|_| ModemError::Protocol(line.to_string()))
}

/// `+CGSN: "123"` and `123` both yield `123`
fn strip_info_prefix(line: &str) -> &str {
    let value = match line.split_once(':') {
        Some((prefix, value)) if prefix.starts_with('+') => value,
        _ => line,
    };
    value.trim().trim_matches('"')
}

fn registration_state(code: u8) -> &'static str {
    match code {
        0 => "NoNetwork",
        1 => "HomeNetwork",
        2 => "RequestingNetwork",
        3 => "RegistrationDenied",
        5 => "RoamingNetwork",
        _ => "Unknown",
    }
}

/// `23002` becomes `230 02`
fn format_network_code(code: &str) -> String {
    if code.len() > 3 && code.chars().all(|c| c.is_ascii_digit()) {
        format!("{} {}", &code[..3], &code[3..])
    } else {
        code.to_string()
    }
}

/// One `+CMGL` entry before concatenated parts are linked
struct StoredEntry {
    location: u32,
    state: SmsState,
    pdu: StoredPdu,
}

fn parse_message_list(lines: &[String]) -> Vec<StoredEntry> {
    let mut entries = Vec::new();
    let mut iter = lines.iter();
    while let Some(line) = iter.next() {
        let Some(captures) = CMGL.captures(line) else {
            continue;
        };
        let location = captures[1].parse().unwrap_or(0);
        let state = captures[2]
            .parse()
            .ok()
            .and_then(SmsState::from_pdu_stat)
            .unwrap_or(SmsState::Read);

        let Some(pdu_line) = iter.next() else {
            warn!(location, "Message list ended before PDU");
            break;
        };
        match decode_stored(pdu_line) {
            Ok(pdu) => entries.push(StoredEntry {
                location,
                state,
                pdu,
            }),
            Err(e) => warn!(location, error = %e, "Skipping undecodable stored message"),
        }
    }
    entries
}

/// Merge the parts of concatenated messages, keeping storage order of the
/// first part seen
fn link_concatenated(entries: Vec<StoredEntry>) -> Vec<SmsMessage> {
    struct Group {
        key: Option<(String, u16, u8)>,
        parts: Vec<(u8, StoredEntry)>,
    }

    let mut groups: Vec<Group> = Vec::new();
    for entry in entries {
        let key = entry
            .pdu
            .concat
            .filter(|concat| concat.total > 1)
            .map(|concat| (entry.pdu.number.clone(), concat.reference, concat.total));
        let sequence = entry.pdu.concat.map_or(1, |concat| concat.sequence);

        let existing = key
            .as_ref()
            .and_then(|key| groups.iter().position(|group| group.key.as_ref() == Some(key)));
        match existing {
            Some(index) => groups[index].parts.push((sequence, entry)),
            None => groups.push(Group {
                key,
                parts: vec![(sequence, entry)],
            }),
        }
    }

    groups
        .into_iter()
        .filter_map(|mut group| {
            group.parts.sort_by_key(|(sequence, _)| *sequence);
            let state = if group
                .parts
                .iter()
                .any(|(_, part)| part.state == SmsState::UnRead)
            {
                SmsState::UnRead
            } else {
                group.parts.first()?.1.state
            };
            let first = &group.parts.first()?.1;
            Some(SmsMessage {
                number: first.pdu.number.clone(),
                date_time: first.pdu.timestamp.clone(),
                state,
                text: group
                    .parts
                    .iter()
                    .map(|(_, part)| part.pdu.text.as_str())
                    .collect(),
                locations: group.parts.iter().map(|(_, part)| part.location).collect(),
            })
        })
        .collect()
}

#[async_trait]
impl Modem for AtModem {
    async fn send_sms(&self, part: &SmsSubmit) -> Result<u8, ModemError> {
        let mut port = self.port.lock().await;
        port.prepare(self.timeout).await?;
        port.submit(part, self.timeout * SEND_TIMEOUT_FACTOR).await
    }

    async fn signal_quality(&self) -> Result<SignalQuality, ModemError> {
        let lines = self.query("AT+CSQ").await?;
        let captures = lines
            .iter()
            .find_map(|line| CSQ.captures(line))
            .ok_or_else(|| ModemError::Protocol("missing +CSQ response".to_string()))?;
        Ok(SignalQuality::from_csq(
            captures[1].parse().unwrap_or(99),
            captures[2].parse().unwrap_or(99),
        ))
    }

    async fn network_info(&self) -> Result<NetworkInfo, ModemError> {
        let lines = self.query("AT+CREG?").await?;
        let captures = lines
            .iter()
            .find_map(|line| CREG.captures(line))
            .ok_or_else(|| ModemError::Protocol("missing +CREG response".to_string()))?;
        let state = registration_state(captures[1].parse().unwrap_or(4));
        let lac = captures.get(2).map(|m| m.as_str().to_uppercase());
        let cid = captures.get(3).map(|m| m.as_str().to_uppercase());

        let network_name = self.operator(0).await?.unwrap_or_default();
        let network_code = self
            .operator(2)
            .await?
            .map(|code| format_network_code(&code))
            .unwrap_or_default();

        Ok(NetworkInfo {
            network_name,
            network_code,
            state: state.to_string(),
            lac,
            cid,
        })
    }

    async fn imei(&self) -> Result<String, ModemError> {
        self.identity("AT+CGSN").await
    }

    async fn manufacturer(&self) -> Result<String, ModemError> {
        self.identity("AT+CGMI").await
    }

    async fn model(&self) -> Result<String, ModemError> {
        self.identity("AT+CGMM").await
    }

    async fn firmware(&self) -> Result<String, ModemError> {
        self.identity("AT+CGMR").await
    }

    async fn sim_imsi(&self) -> Result<String, ModemError> {
        self.identity("AT+CIMI").await
    }

    async fn sms_status(&self) -> Result<SmsCapacity, ModemError> {
        let lines = self.query("AT+CPMS?").await?;
        let captures = lines
            .iter()
            .find_map(|line| CPMS.captures(line))
            .ok_or_else(|| ModemError::Protocol("missing +CPMS response".to_string()))?;
        Ok(SmsCapacity {
            sim_used: captures[1].parse().unwrap_or(0),
            sim_size: captures[2].parse().unwrap_or(0),
        })
    }

    async fn retrieve_all_sms(&self) -> Result<Vec<SmsMessage>, ModemError> {
        let lines = self.query("AT+CMGL=4").await?;
        Ok(link_concatenated(parse_message_list(&lines)))
    }

    async fn delete_sms(&self, message: &SmsMessage) -> Result<(), ModemError> {
        for location in &message.locations {
            self.query(&format!("AT+CMGD={location}")).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modem::pdu::OutgoingSms;
    use crate::modem::Smsc;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|line| line.to_string()).collect()
    }

    #[test]
    fn test_final_result_codes() {
        assert_eq!(final_result("OK"), Some(Ok(())));
        assert_eq!(final_result("ERROR"), Some(Err(ModemError::Rejected)));
        assert_eq!(
            final_result("+CMS ERROR: 330"),
            Some(Err(ModemError::Message(330)))
        );
        assert_eq!(
            final_result("+CME ERROR: 30"),
            Some(Err(ModemError::Equipment(30)))
        );
        assert!(matches!(
            final_result("+CME ERROR: SIM not inserted"),
            Some(Err(ModemError::Protocol(_)))
        ));
        assert_eq!(final_result("+CSQ: 20,99"), None);
    }

    #[test]
    fn test_strip_info_prefix() {
        assert_eq!(strip_info_prefix("356938035643809"), "356938035643809");
        assert_eq!(strip_info_prefix("+CGSN: \"356938035643809\""), "356938035643809");
        assert_eq!(strip_info_prefix("+CGMI: HUAWEI"), "HUAWEI");
    }

    #[test]
    fn test_format_network_code() {
        assert_eq!(format_network_code("23002"), "230 02");
        assert_eq!(format_network_code("310410"), "310 410");
        assert_eq!(format_network_code("T-Mobile"), "T-Mobile");
    }

    #[test]
    fn test_parse_message_list() {
        let entries = parse_message_list(&lines(&[
            "+CMGL: 1,0,,28",
            "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37",
            "+CMGL: 2,1,,3",
            "ZZ",
        ]));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].location, 1);
        assert_eq!(entries[0].state, SmsState::UnRead);
        assert_eq!(entries[0].pdu.text, "hellohello");
    }

    #[test]
    fn test_concatenated_parts_are_linked() {
        let text = format!("{}end", "a".repeat(160));
        let parts = OutgoingSms::new("+420111222333", &text, false)
            .encode(&Smsc::Location(1), 5)
            .unwrap();
        assert_eq!(parts.len(), 2);
        let second = parts[1].to_pdu().hex;
        let first = parts[0].to_pdu().hex;

        // stored out of order, with a single message in between
        let raw = lines(&[
            "+CMGL: 4,3,,30",
            second.as_str(),
            "+CMGL: 5,1,,28",
            "07917283010010F5040BC87238880900F10000993092516195800AE8329BFD4697D9EC37",
            "+CMGL: 6,3,,160",
            first.as_str(),
        ]);
        let messages = link_concatenated(parse_message_list(&raw));

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text, text);
        assert_eq!(messages[0].locations, vec![6, 4]);
        assert_eq!(messages[0].state, SmsState::Sent);
        assert_eq!(messages[1].locations, vec![5]);
        assert_eq!(messages[1].state, SmsState::Read);
    }
}
