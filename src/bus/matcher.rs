//! Сопоставление конкретного топика с шаблоном подписки.
//!
//! Язык шаблонов плоский: `?` покрывает ровно один байт, `*` — ноль и более
//! байт, любой другой байт сравнивается буквально. Разделители ничем не
//! выделяются: `data.*` покрывает и `data.trade`, и `data.trade.BTCUSDT`.

/// Проверяет, покрывает ли шаблон `pattern` конкретный топик `topic`.
///
/// Сравнение побайтовое. Предикат чистый и вызывается по одному разу на
/// шаблон при построении кеша резолюции, поэтому вместо полной DP-матрицы
/// держим одну строку и резервную диагональную ячейку.
pub fn is_match(
    topic: &str,
    pattern: &str,
) -> bool {
    let t = topic.as_bytes();
    let p = pattern.as_bytes();

    // row[j] после итерации i: покрывает ли префикс шаблона длины j
    // префикс топика длины i.
    let mut row = vec![false; p.len() + 1];
    row[0] = true;
    for j in 1..=p.len() {
        row[j] = row[j - 1] && p[j - 1] == b'*';
    }

    for i in 1..=t.len() {
        // diag хранит значение T[i-1][j-1] до перезаписи row[j-1].
        let mut diag = row[0];
        row[0] = false;
        for j in 1..=p.len() {
            let above = row[j];
            row[j] = match p[j - 1] {
                b'*' => above || row[j - 1],
                b'?' => diag,
                byte => diag && t[i - 1] == byte,
            };
            diag = above;
        }
    }

    row[p.len()]
}
