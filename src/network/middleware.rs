use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{AUTHORIZATION, HeaderValue, USER_AGENT};
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result};
use tracing::debug;

use crate::network::session::Session;

/// 会话注入中间件
/// 负责在每次请求前，动态将 Session 中的最新 UA/凭据/附加头注入 Header
pub struct SessionMiddleware {
    session: Arc<Session>,
}

impl SessionMiddleware {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait::async_trait]
impl Middleware for SessionMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let headers = req.headers_mut();

        let ua = self.session.get_ua();
        if !ua.is_empty()
            && let Ok(val) = HeaderValue::from_str(&ua)
        {
            headers.insert(USER_AGENT, val);
        }

        if let Some(token) = self.session.get_bearer()
            && let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", token))
        {
            headers.insert(AUTHORIZATION, val);
        }

        for (k, v) in self.session.get_headers().iter() {
            headers.insert(k.clone(), v.clone());
        }

        next.run(req, extensions).await
    }
}

/// 请求日志中间件
/// 记录方法、地址、状态码与耗时
pub struct TraceMiddleware;

#[async_trait::async_trait]
impl Middleware for TraceMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        let method = req.method().clone();
        let url = req.url().to_string();
        let started = Instant::now();

        let result = next.run(req, extensions).await;

        match &result {
            Ok(resp) => debug!(
                "{} {} -> {} ({:?})",
                method,
                url,
                resp.status(),
                started.elapsed()
            ),
            Err(e) => debug!("{} {} -> error: {} ({:?})", method, url, e, started.elapsed()),
        }

        result
    }
}
