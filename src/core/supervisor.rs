//! 生成监管：为每次生成分配子取消令牌
//!
//! cancel_current 只取消正在进行的生成；cancel_all 取消全部（含加载）并换新根令牌。
//! 生成结束时 end 清掉登记，之后的 cancel_current 返回 false。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct GenerationSupervisor {
    root: Mutex<CancellationToken>,
    /// (操作 id, 令牌)
    current: Mutex<Option<(u64, CancellationToken)>>,
}

impl GenerationSupervisor {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(CancellationToken::new()),
            current: Mutex::new(None),
        }
    }

    fn root_token(&self) -> CancellationToken {
        self.root.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 新一次生成的令牌，登记为当前生成
    pub fn begin(&self, op: u64) -> CancellationToken {
        let token = self.root_token().child_token();
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some((op, token.clone()));
        token
    }

    /// 生成结束；只清掉属于该操作的登记
    pub fn end(&self, op: u64) {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(current.as_ref(), Some((id, _)) if *id == op) {
            current.take();
        }
    }

    /// 加载等非生成操作使用的令牌（只受 cancel_all 影响）
    pub fn child_token(&self) -> CancellationToken {
        self.root_token().child_token()
    }

    /// 取消当前生成；没有进行中的生成时返回 false
    pub fn cancel_current(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
        match current {
            Some((_, token)) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
        root.cancel();
        *root = CancellationToken::new();
        self.current.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl Default for GenerationSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
