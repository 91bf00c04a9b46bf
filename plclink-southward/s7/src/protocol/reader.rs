use super::{
    connection::Connection,
    error::{Error, PlcResponseCode, Result},
    frame::{S7Message, S7Parameter, S7Payload},
    tag::Tag,
    value::PlcValue,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// Header error the controller answers with when PUT/GET access is disabled.
const PUT_GET_DENIED: (u8, u8) = (0x81, 0x04);

/// Response code applied to every tag when the response header carries an
/// error, `None` for a clean header.
pub(crate) fn header_response_code(message: &S7Message) -> Option<PlcResponseCode> {
    match message.header_error()? {
        (0, 0) => None,
        PUT_GET_DENIED => {
            warn!("access denied, PUT/GET communication may be disabled on the controller");
            Some(PlcResponseCode::AccessDenied)
        }
        (class, code) => {
            warn!(class, code, "response header reports an error");
            Some(PlcResponseCode::InternalError)
        }
    }
}

/// Collects named tags into one read request.
///
/// Adding a name twice replaces the earlier tag but keeps its position.
#[derive(Debug)]
pub struct ReadRequestBuilder {
    connection: Arc<Connection>,
    tags: Vec<(String, Tag)>,
}

impl ReadRequestBuilder {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            tags: Vec::new(),
        }
    }

    /// Parse `address` and add it under `name`.
    pub fn add_tag_address(self, name: impl Into<String>, address: &str) -> Result<Self> {
        let tag = self.connection.tag_handler().parse_tag(address)?;
        Ok(self.add_tag(name, tag))
    }

    pub fn add_tag(mut self, name: impl Into<String>, tag: Tag) -> Self {
        let name = name.into();
        match self.tags.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = tag,
            None => self.tags.push((name, tag)),
        }
        self
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|(n, _)| n.as_str())
    }

    pub async fn execute(self) -> Result<ReadResponse> {
        self.run(None).await
    }

    pub async fn execute_with_cancel(self, cancel: &CancellationToken) -> Result<ReadResponse> {
        self.run(Some(cancel)).await
    }

    #[instrument(level = "debug", skip_all, fields(tags = self.tags.len()))]
    async fn run(self, cancel: Option<&CancellationToken>) -> Result<ReadResponse> {
        if self.tags.is_empty() {
            return Ok(ReadResponse::default());
        }
        let items = self
            .tags
            .iter()
            .map(|(_, tag)| tag.to_s7_address())
            .collect::<Result<Vec<_>>>()?;
        let message = self
            .connection
            .submit(
                |id| S7Message::request(id, S7Parameter::ReadVarRequest { items }, None),
                cancel,
            )
            .await?;
        decode_read_response(self.tags, &message)
    }
}

/// Bind the items of a read response to the requested tags by position.
pub(crate) fn decode_read_response(tags: Vec<(String, Tag)>, message: &S7Message) -> Result<ReadResponse> {
    if let Some(code) = header_response_code(message) {
        return Ok(ReadResponse {
            items: tags
                .into_iter()
                .map(|(name, tag)| ReadResponseItem {
                    name,
                    tag,
                    code,
                    value: None,
                })
                .collect(),
        });
    }
    let Some(S7Payload::ReadVarResponse { items }) = &message.payload else {
        return Err(Error::ErrUnexpectedPdu);
    };
    if items.len() != tags.len() {
        return Err(Error::ErrItemCountMismatch {
            expected: tags.len(),
            actual: items.len(),
        });
    }

    let items = tags
        .into_iter()
        .zip(items)
        .map(|((name, tag), item)| {
            let mut code = PlcResponseCode::from(item.return_code);
            let mut value = None;
            if code == PlcResponseCode::Ok {
                match PlcValue::decode(&tag, &item.data) {
                    Ok(v) => value = Some(v),
                    Err(e) => {
                        warn!(tag = %name, error = %e, "failed to decode value");
                        code = PlcResponseCode::InternalError;
                    }
                }
            }
            ReadResponseItem {
                name,
                tag,
                code,
                value,
            }
        })
        .collect();
    Ok(ReadResponse { items })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponseItem {
    pub name: String,
    pub tag: Tag,
    pub code: PlcResponseCode,
    /// Present only when `code` is `Ok`
    pub value: Option<PlcValue>,
}

/// Per-tag results in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResponse {
    items: Vec<ReadResponseItem>,
}

impl ReadResponse {
    fn item(&self, name: &str) -> Option<&ReadResponseItem> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn response_code(&self, name: &str) -> Option<PlcResponseCode> {
        self.item(name).map(|i| i.code)
    }

    pub fn value(&self, name: &str) -> Option<&PlcValue> {
        self.item(name).and_then(|i| i.value.as_ref())
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReadResponseItem> {
        self.items.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl IntoIterator for ReadResponse {
    type Item = ReadResponseItem;
    type IntoIter = std::vec::IntoIter<ReadResponseItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
