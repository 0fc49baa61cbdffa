use std::marker::PhantomData;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::{
    config::ClusterConfig,
    informer::{ListOptions, ListWatcher, ObjectList, WatchError, WatchStream},
    models::{watch::WatchEvent, ErrResponse, Response},
    objects::Object,
};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection handle shared by every list-watcher of one cluster.
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub http: reqwest::Client,
    pub cluster: ClusterConfig,
}

impl ClientContext {
    pub fn new(cluster: ClusterConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            cluster,
        }
    }
}

/// Lists `GET {api}/api/v1/{resource}` and watches
/// `{ws}/api/v1/watch/{resource}?resourceVersion=..`.
pub struct HttpListWatcher<T> {
    context: ClientContext,
    resource: String,
    _object: PhantomData<fn() -> T>,
}

impl<T: Object> HttpListWatcher<T> {
    pub fn new(context: ClientContext, resource: &str) -> Self {
        Self {
            context,
            resource: resource.trim_matches('/').to_owned(),
            _object: PhantomData,
        }
    }

    pub fn list_url(&self) -> String {
        format!(
            "{}/api/v1/{}",
            self.context.cluster.api_server_url.trim_end_matches('/'),
            self.resource
        )
    }

    pub fn watch_url(&self, resource_version: &str) -> String {
        let url = format!(
            "{}/api/v1/watch/{}",
            self.context.cluster.api_server_watch_url.trim_end_matches('/'),
            self.resource
        );
        if resource_version.is_empty() {
            url
        } else {
            format!("{}?resourceVersion={}", url, resource_version)
        }
    }

    /// Open the raw watch stream without going through an informer.
    pub async fn connect(&self, resource_version: &str) -> Result<WsStream, WatchError> {
        let url = Url::parse(self.watch_url(resource_version).as_str()).map_err(WatchError::transport)?;
        let (stream, _) = connect_async(url).await.map_err(WatchError::transport)?;
        Ok(stream)
    }
}

#[async_trait]
impl<T: Object> ListWatcher<T> for HttpListWatcher<T> {
    async fn list(&self, options: &ListOptions) -> Result<ObjectList<T>, WatchError> {
        let response = self
            .context
            .http
            .get(self.list_url())
            .send()
            .await
            .map_err(WatchError::transport)?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.json::<ErrResponse>().await {
                Ok(err) => err.to_string(),
                Err(_) => status.to_string(),
            };
            return Err(WatchError::Remote {
                code: status.as_u16(),
                message,
            });
        }

        let res = response
            .json::<Response<Vec<T>>>()
            .await
            .map_err(WatchError::decode)?;
        let items = res
            .data
            .ok_or_else(|| WatchError::decode("Lister failed, response carries no data"))?;
        Ok(ObjectList {
            items: items.into_iter().filter(|o| options.matches(o)).collect(),
            resource_version: res.resource_version.unwrap_or_default(),
        })
    }

    async fn watch(
        &self,
        options: &ListOptions,
        resource_version: &str,
    ) -> Result<WatchStream<T>, WatchError> {
        let (_, receiver) = self.connect(resource_version).await?.split();
        let events = stream::unfold(
            (receiver, options.clone()),
            |(mut receiver, options)| async move {
                loop {
                    let msg = match receiver.next().await? {
                        Ok(msg) => msg,
                        Err(e) => {
                            return Some((Err(WatchError::transport(e)), (receiver, options)));
                        },
                    };
                    match msg {
                        Message::Text(text) => match serde_json::from_str::<WatchEvent<T>>(&text) {
                            Ok(event) => {
                                if let Some(event) = select_event(event, &options) {
                                    return Some((Ok(event), (receiver, options)));
                                }
                            },
                            Err(e) => {
                                return Some((Err(WatchError::decode(e)), (receiver, options)));
                            },
                        },
                        Message::Close(_) => return None,
                        Message::Binary(_) => {
                            tracing::warn!("Receive none text watch message from api-server");
                        },
                        _ => {},
                    }
                }
            },
        );
        Ok(events.boxed())
    }
}

/// Apply list options to a watch event on the client side. An object that
/// is modified out of the selection is reported as deleted.
pub fn select_event<T: Object>(event: WatchEvent<T>, options: &ListOptions) -> Option<WatchEvent<T>> {
    match event {
        WatchEvent::Added { object } => options.matches(&object).then(|| WatchEvent::Added { object }),
        WatchEvent::Modified { object } if !options.matches(&object) => {
            Some(WatchEvent::Deleted { object })
        },
        event => Some(event),
    }
}
