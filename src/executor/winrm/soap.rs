//! WS-Management envelopes for the remote shell resource.
//!
//! Responses are scanned with plain string search; only a handful of
//! attributes and elements are ever read back.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

const NS_SOAP: &str = "http://www.w3.org/2003/05/soap-envelope";
const NS_ADDRESSING: &str = "http://schemas.xmlsoap.org/ws/2004/08/addressing";
const NS_WSMAN: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const NS_SHELL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

pub(crate) const RESOURCE_CMD: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";

const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str =
    "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";

const STATE_DONE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done";

/// Per-request addressing shared by every envelope.
pub(crate) struct Envelope<'a> {
    pub endpoint: &'a str,
    pub message_id: &'a str,
    pub timeout: &'a str,
}

impl Envelope<'_> {
    fn header(&self, action: &str, shell_id: Option<&str>) -> String {
        let mut header = format!(
            r#"<s:Header>
      <a:To>{endpoint}</a:To>
      <a:Action s:mustUnderstand="true">{action}</a:Action>
      <w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>
      <a:MessageID>uuid:{message_id}</a:MessageID>
      <a:ReplyTo>
        <a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address>
      </a:ReplyTo>
      <w:OperationTimeout>{timeout}</w:OperationTimeout>"#,
            endpoint = xml_escape(self.endpoint),
            action = action,
            resource = RESOURCE_CMD,
            message_id = self.message_id,
            timeout = self.timeout,
        );
        if let Some(sid) = shell_id {
            header.push_str(&format!(
                r#"
      <w:SelectorSet>
        <w:Selector Name="ShellId">{}</w:Selector>
      </w:SelectorSet>"#,
                xml_escape(sid)
            ));
        }
        header.push_str("\n    </s:Header>");
        header
    }

    fn wrap(&self, header: &str, body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="{NS_SOAP}" xmlns:a="{NS_ADDRESSING}" xmlns:w="{NS_WSMAN}" xmlns:rsp="{NS_SHELL}">
    {header}
    <s:Body>
      {body}
    </s:Body>
</s:Envelope>"#
        )
    }

    pub fn create_shell(&self) -> String {
        let header = self.header(ACTION_CREATE, None);
        let body = r#"<rsp:Shell>
        <rsp:InputStreams>stdin</rsp:InputStreams>
        <rsp:OutputStreams>stdout stderr</rsp:OutputStreams>
        <w:OptionSet>
          <w:Option Name="WINRS_NOPROFILE">TRUE</w:Option>
          <w:Option Name="WINRS_CODEPAGE">65001</w:Option>
        </w:OptionSet>
      </rsp:Shell>"#;
        self.wrap(&header, body)
    }

    pub fn delete_shell(&self, shell_id: &str) -> String {
        let header = self.header(ACTION_DELETE, Some(shell_id));
        self.wrap(&header, "")
    }

    pub fn command(&self, shell_id: &str, command: &str, arguments: &[String]) -> String {
        let header = self.header(ACTION_COMMAND, Some(shell_id));
        let args: String = arguments
            .iter()
            .map(|a| format!("<rsp:Arguments>{}</rsp:Arguments>", xml_escape(a)))
            .collect::<Vec<_>>()
            .join("\n        ");
        let body = format!(
            r#"<rsp:CommandLine>
        <rsp:Command>{}</rsp:Command>
        {}
      </rsp:CommandLine>"#,
            xml_escape(command),
            args
        );
        self.wrap(&header, &body)
    }

    pub fn receive(&self, shell_id: &str, command_id: &str) -> String {
        let header = self.header(ACTION_RECEIVE, Some(shell_id));
        let body = format!(
            r#"<rsp:Receive>
        <rsp:DesiredStream CommandId="{}">stdout stderr</rsp:DesiredStream>
      </rsp:Receive>"#,
            xml_escape(command_id)
        );
        self.wrap(&header, &body)
    }

    pub fn terminate(&self, shell_id: &str, command_id: &str) -> String {
        let header = self.header(ACTION_SIGNAL, Some(shell_id));
        let body = format!(
            r#"<rsp:Signal CommandId="{}">
        <rsp:Code>{}</rsp:Code>
      </rsp:Signal>"#,
            xml_escape(command_id),
            SIGNAL_TERMINATE
        );
        self.wrap(&header, &body)
    }
}

/// Value of `attr="..."` or the text of `<rsp:{attr}>`, whichever appears first.
fn attr_or_element(response: &str, attr: &str) -> Option<String> {
    let pattern = format!("{}=\"", attr);
    if let Some(start) = response.find(&pattern) {
        let rest = &response[start + pattern.len()..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }
    element_text(response, &format!("rsp:{}", attr))
}

fn element_text(response: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let start = response.find(&open)?;
    let gt = response[start..].find('>')?;
    let text_start = start + gt + 1;
    let end = response[text_start..].find(&format!("</{}>", tag))?;
    Some(response[text_start..text_start + end].trim().to_string())
}

pub(crate) fn shell_id(response: &str) -> Option<String> {
    attr_or_element(response, "ShellId")
}

pub(crate) fn command_id(response: &str) -> Option<String> {
    attr_or_element(response, "CommandId")
}

/// One Receive round: decoded output and, once the command finished, its exit code.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ReceiveChunk {
    pub stdout: String,
    pub stderr: String,
    pub done: bool,
    pub exit_code: Option<i32>,
}

pub(crate) fn parse_receive(response: &str) -> ReceiveChunk {
    let mut chunk = ReceiveChunk::default();
    extract_stream(response, "stdout", &mut chunk.stdout);
    extract_stream(response, "stderr", &mut chunk.stderr);
    chunk.done = response.contains(STATE_DONE);
    chunk.exit_code = element_text(response, "rsp:ExitCode").and_then(|c| c.parse().ok());
    chunk
}

fn extract_stream(response: &str, stream: &str, output: &mut String) {
    let pattern = format!("Name=\"{}\"", stream);
    let mut search_from = 0;

    while let Some(pos) = response[search_from..].find(&pattern) {
        let abs = search_from + pos;
        let Some(gt) = response[abs..].find('>') else {
            break;
        };
        // Self-closing stream tags carry no data.
        if response[..abs + gt].ends_with('/') {
            search_from = abs + gt + 1;
            continue;
        }
        let data_start = abs + gt + 1;
        let Some(end) = response[data_start..].find("</rsp:Stream>") else {
            break;
        };
        let encoded = response[data_start..data_start + end].trim();
        if !encoded.is_empty()
            && let Ok(decoded) = STANDARD.decode(encoded)
        {
            output.push_str(&String::from_utf8_lossy(&decoded));
        }
        search_from = data_start + end;
    }
}

/// Human-readable reason from a SOAP fault body.
pub(crate) fn parse_fault(response: &str) -> Option<String> {
    if let Some(start) = response.find("Message=\"") {
        let rest = &response[start + 9..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }
    element_text(response, "s:Text")
        .or_else(|| element_text(response, "f:Message"))
        .or_else(|| element_text(response, "faultstring"))
}

pub(crate) fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// `-EncodedCommand` payload: UTF-16LE, base64.
pub(crate) fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script.encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
    STANDARD.encode(utf16)
}
