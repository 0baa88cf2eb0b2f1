use anyhow::Result;
use std::sync::mpsc;
use std::thread;

use super::{FrameSample, FrameSource};

/// 別スレッドで先読みするフレームソース
///
/// 下流が1フレーム処理している間にワーカが次をデコードしておく。
/// チャネルが有界なのでフレームの読み捨ては起きず、順序もそのまま届く。
pub struct PrefetchSource {
    rx: Option<mpsc::Receiver<Result<FrameSample>>>,
    total: Option<usize>,
    worker: Option<thread::JoinHandle<()>>,
}

impl PrefetchSource {
    pub fn start<S>(mut inner: S, depth: usize) -> Self
    where
        S: FrameSource + Send + 'static,
    {
        let total = inner.len();
        let (tx, rx) = mpsc::sync_channel(depth.max(1));
        let worker = thread::spawn(move || loop {
            match inner.next_frame() {
                Ok(Some(sample)) => {
                    if tx.send(Ok(sample)).is_err() {
                        // 受信側が先に閉じた
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    let _ = tx.send(Err(e));
                    break;
                }
            }
        });
        Self { rx: Some(rx), total, worker: Some(worker) }
    }
}

impl FrameSource for PrefetchSource {
    fn next_frame(&mut self) -> Result<Option<FrameSample>> {
        let rx = match &self.rx {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match rx.recv() {
            Ok(item) => item.map(Some),
            // 送信側の切断 = 全フレーム配送済み
            Err(mpsc::RecvError) => Ok(None),
        }
    }

    fn len(&self) -> Option<usize> {
        self.total
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        // 受信側を先に閉じ、send待ちのワーカを解放してから合流する
        drop(self.rx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
