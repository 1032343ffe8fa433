use rand::Rng;

/// Fisher–Yates洗牌
///
/// 每完成 `yield_interval` 次交换让出一次执行权，大牌堆不会长时间占用运行时线程。
pub async fn shuffle<T, R>(items: &mut [T], rng: &mut R, yield_interval: usize)
where
    T: Send,
    R: Rng + Send,
{
    let len = items.len();
    if len < 2 {
        return;
    }

    let yield_interval = yield_interval.max(1);
    let mut swaps = 0usize;
    for i in (1..len).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);

        swaps += 1;
        if swaps % yield_interval == 0 {
            tokio::task::yield_now().await;
        }
    }
}
