use super::{
    connection::Connection,
    error::{Error, PlcResponseCode, Result},
    frame::{DataTransportErrorCode, S7Message, S7Parameter, S7Payload, S7VarPayloadDataItem},
    reader::header_response_code,
    tag::Tag,
    value::PlcValue,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Collects named tags and their values into one write request.
#[derive(Debug)]
pub struct WriteRequestBuilder {
    connection: Arc<Connection>,
    tags: Vec<(String, Tag, PlcValue)>,
}

impl WriteRequestBuilder {
    pub(crate) fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            tags: Vec::new(),
        }
    }

    pub fn add_tag_address(
        self,
        name: impl Into<String>,
        address: &str,
        value: impl Into<PlcValue>,
    ) -> Result<Self> {
        let tag = self.connection.tag_handler().parse_tag(address)?;
        Ok(self.add_tag(name, tag, value))
    }

    pub fn add_tag(mut self, name: impl Into<String>, tag: Tag, value: impl Into<PlcValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.tags.iter_mut().find(|(n, _, _)| *n == name) {
            Some(entry) => {
                entry.1 = tag;
                entry.2 = value;
            }
            None => self.tags.push((name, tag, value)),
        }
        self
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|(n, _, _)| n.as_str())
    }

    pub async fn execute(self) -> Result<WriteResponse> {
        self.run(None).await
    }

    pub async fn execute_with_cancel(self, cancel: &CancellationToken) -> Result<WriteResponse> {
        self.run(Some(cancel)).await
    }

    #[instrument(level = "debug", skip_all, fields(tags = self.tags.len()))]
    async fn run(self, cancel: Option<&CancellationToken>) -> Result<WriteResponse> {
        if self.tags.is_empty() {
            return Ok(WriteResponse::default());
        }
        let mut addresses = Vec::with_capacity(self.tags.len());
        let mut data = Vec::with_capacity(self.tags.len());
        for (name, tag, value) in &self.tags {
            addresses.push(tag.to_s7_address()?);
            let bytes = value.encode(tag).map_err(|e| match e {
                Error::ErrInvalidValue { reason, .. } => Error::ErrInvalidValue {
                    tag: name.clone(),
                    reason,
                },
                other => other,
            })?;
            data.push(S7VarPayloadDataItem::new(
                DataTransportErrorCode::Ok,
                tag.data_type().data_transport_size(),
                bytes,
            ));
        }
        let message = self
            .connection
            .submit(
                |id| {
                    S7Message::request(
                        id,
                        S7Parameter::WriteVarRequest { items: addresses },
                        Some(S7Payload::WriteVarRequest { items: data }),
                    )
                },
                cancel,
            )
            .await?;
        let tags = self.tags.into_iter().map(|(name, tag, _)| (name, tag)).collect();
        decode_write_response(tags, &message)
    }
}

pub(crate) fn decode_write_response(tags: Vec<(String, Tag)>, message: &S7Message) -> Result<WriteResponse> {
    if let Some(code) = header_response_code(message) {
        return Ok(WriteResponse {
            items: tags
                .into_iter()
                .map(|(name, tag)| WriteResponseItem { name, tag, code })
                .collect(),
        });
    }
    let Some(S7Payload::WriteVarResponse { items }) = &message.payload else {
        return Err(Error::ErrUnexpectedPdu);
    };
    if items.len() != tags.len() {
        return Err(Error::ErrItemCountMismatch {
            expected: tags.len(),
            actual: items.len(),
        });
    }
    Ok(WriteResponse {
        items: tags
            .into_iter()
            .zip(items)
            .map(|((name, tag), code)| WriteResponseItem {
                name,
                tag,
                code: PlcResponseCode::from(*code),
            })
            .collect(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponseItem {
    pub name: String,
    pub tag: Tag,
    pub code: PlcResponseCode,
}

/// Per-tag results in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteResponse {
    items: Vec<WriteResponseItem>,
}

impl WriteResponse {
    pub fn response_code(&self, name: &str) -> Option<PlcResponseCode> {
        self.items.iter().find(|i| i.name == name).map(|i| i.code)
    }

    pub fn tag_names(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|i| i.name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteResponseItem> {
        self.items.iter()
    }

    /// Whether every tag was written.
    pub fn all_ok(&self) -> bool {
        self.items.iter().all(|i| i.code == PlcResponseCode::Ok)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{frame::S7MessageKind, tag::TagHandler};

    fn tags() -> Vec<(String, Tag)> {
        let handler = TagHandler::default();
        vec![
            ("speed".to_string(), handler.parse_tag("%DB1.DBW0:INT").unwrap()),
            ("name".to_string(), handler.parse_tag("%DB1.DBB2:STRING(8)").unwrap()),
        ]
    }

    #[test]
    fn codes_follow_request_order() {
        let message = S7Message::response_data(
            11,
            Some(S7Parameter::WriteVarResponse { num_items: 2 }),
            Some(S7Payload::WriteVarResponse {
                items: vec![DataTransportErrorCode::Ok, DataTransportErrorCode::AccessDenied],
            }),
        );
        let res = decode_write_response(tags(), &message).unwrap();
        assert_eq!(res.response_code("speed"), Some(PlcResponseCode::Ok));
        assert_eq!(res.response_code("name"), Some(PlcResponseCode::AccessDenied));
        assert!(!res.all_ok());
    }

    #[test]
    fn header_error_applies_to_all() {
        let mut message = S7Message::response_data(11, None, None);
        message.kind = S7MessageKind::ResponseData {
            error_class: 0x81,
            error_code: 0x04,
        };
        let res = decode_write_response(tags(), &message).unwrap();
        assert!(res.iter().all(|i| i.code == PlcResponseCode::AccessDenied));
    }

    #[test]
    fn count_mismatch_fails_the_batch() {
        let message = S7Message::response_data(
            11,
            Some(S7Parameter::WriteVarResponse { num_items: 1 }),
            Some(S7Payload::WriteVarResponse {
                items: vec![DataTransportErrorCode::Ok],
            }),
        );
        assert!(matches!(
            decode_write_response(tags(), &message),
            Err(Error::ErrItemCountMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
