use std::collections::VecDeque;

use tabletop_core::{EventClass, EventPriority, GameEvent};

/// 按优先级入队：高优先级放到队首，普通优先级放到队尾
pub fn enqueue(queue: &mut VecDeque<GameEvent>, event: GameEvent) {
    match event.priority {
        EventPriority::High => queue.push_front(event),
        EventPriority::Normal => queue.push_back(event),
    }
}

/// 从队首取出下一批可以并发执行的事件
///
/// - 队首是顺序事件或未分类事件时，该事件单独成批
/// - 队首是并行安全事件时，继续取后续的并行安全事件，直到遇到其他类别或达到 `max_batch_size`
pub fn form_batch(queue: &mut VecDeque<GameEvent>, max_batch_size: usize) -> Vec<GameEvent> {
    let Some(first) = queue.pop_front() else {
        return Vec::new();
    };
    if first.class() != EventClass::ParallelSafe {
        return vec![first];
    }

    let mut batch = vec![first];
    while batch.len() < max_batch_size.max(1) {
        match queue.front() {
            Some(next) if next.class() == EventClass::ParallelSafe => {
                if let Some(event) = queue.pop_front() {
                    batch.push(event);
                }
            }
            _ => break,
        }
    }
    batch
}
